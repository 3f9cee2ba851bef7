use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::types::{OnFail, Sequence, Step, StepKind, StepSettings};
use super::utils::parse_duration_value;

const META_KEYS: [&str; 6] = ["id", "name", "duration", "enabled", "retries", "on_fail"];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("step {0}: {1}")]
    Step(usize, String),
}

impl Sequence {
    pub fn from_str(yaml: &str) -> Result<Self, ParseError> {
        let root: serde_yaml::Value = serde_yaml::from_str(yaml)?;

        let variables: HashMap<String, serde_yaml::Value> = root
            .get("variables")
            .map(|v| serde_yaml::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();

        let name = root.get("name").and_then(|v| v.as_str()).map(String::from);

        let steps = root
            .get("steps")
            .and_then(|v| v.as_sequence())
            .ok_or_else(|| ParseError::Step(0, "missing 'steps'".into()))?
            .iter()
            .enumerate()
            .map(|(i, v)| parse_step(i, v, &variables))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for (i, step) in steps.iter().enumerate() {
            if !seen.insert(step.id.as_str()) {
                return Err(ParseError::Step(i, format!("duplicate step id '{}'", step.id)));
            }
        }

        let mut sequence = Sequence::new(steps);
        sequence.name = name;
        Ok(sequence)
    }
}

fn parse_step(
    i: usize,
    value: &serde_yaml::Value,
    vars: &HashMap<String, serde_yaml::Value>,
) -> Result<Step, ParseError> {
    let err = |msg: &str| ParseError::Step(i, msg.into());
    let map = value.as_mapping().ok_or_else(|| err("expected mapping"))?;

    // Exactly one key names the step type; the rest are metadata.
    let mut commands = map
        .iter()
        .filter(|(k, _)| !k.as_str().is_some_and(|k| META_KEYS.contains(&k)));
    let (key, body) = commands.next().ok_or_else(|| err("no step type found"))?;
    if commands.next().is_some() {
        return Err(err("more than one step type in a single step"));
    }

    let key = key.as_str().ok_or_else(|| err("step type must be a string"))?;
    let kind = StepKind::from_key(key).ok_or_else(|| err(&format!("unknown step type: {}", key)))?;
    let body = match resolve_value(body, vars) {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
        other => other,
    };
    let settings = StepSettings::from_yaml(kind, body).map_err(|e| err(&e.to_string()))?;
    settings.validate().map_err(|e| err(&e))?;

    let meta = |name: &str| map.get(name).map(|v| resolve_value(v, vars));

    let duration = meta("duration")
        .ok_or_else(|| err("missing 'duration'"))
        .and_then(|v| parse_duration_value(&v).map_err(|e| err(&e)))?;

    let id = match meta("id") {
        Some(v) => simple_to_string(&v).ok_or_else(|| err("id must be a scalar"))?,
        None => format!("step-{}", i + 1),
    };

    let name = meta("name").as_ref().and_then(simple_to_string);

    let enabled = match meta("enabled") {
        Some(v) => v.as_bool().ok_or_else(|| err("enabled must be a boolean"))?,
        None => true,
    };

    let retry_budget = match meta("retries") {
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| err("retries must be a non-negative integer"))?,
        None => 0,
    };

    let on_fail: OnFail = meta("on_fail")
        .map(serde_yaml::from_value)
        .transpose()
        .map_err(|e| err(&e.to_string()))?
        .unwrap_or_default();

    let mut step = Step::new(id, settings, duration)
        .with_retries(retry_budget)
        .with_on_fail(on_fail);
    step.name = name;
    if !enabled {
        step = step.disabled();
    }
    Ok(step)
}

fn resolve_value(
    value: &serde_yaml::Value,
    vars: &HashMap<String, serde_yaml::Value>,
) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::String(s) => {
            // Direct reference: "$var"
            let t = s.trim();
            if t.starts_with('$') && !t.contains(' ') {
                if let Some(v) = vars.get(&t[1..]) {
                    return v.clone();
                }
            }
            // Inline substitution
            let mut result = s.clone();
            for (name, val) in vars {
                let pattern = format!("${}", name);
                if let Some(rep) = simple_to_string(val) {
                    result = result.replace(&pattern, &rep);
                }
            }
            serde_yaml::Value::String(result)
        }
        serde_yaml::Value::Mapping(m) => serde_yaml::Value::Mapping(
            m.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, vars)))
                .collect(),
        ),
        serde_yaml::Value::Sequence(s) => {
            serde_yaml::Value::Sequence(s.iter().map(|v| resolve_value(v, vars)).collect())
        }
        other => other.clone(),
    }
}

fn simple_to_string(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
