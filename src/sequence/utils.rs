use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Parses a duration given either as a humantime string (`"90s"`, `"2m 30s"`)
/// or as a plain number of seconds.
pub fn parse_duration_value(value: &serde_yaml::Value) -> Result<Duration, String> {
    match value {
        serde_yaml::Value::String(s) => {
            humantime::parse_duration(s.trim()).map_err(|e| e.to_string())
        }
        serde_yaml::Value::Number(n) => {
            let secs = n.as_f64().ok_or_else(|| format!("invalid duration: {}", n))?;
            Duration::try_from_secs_f64(secs)
                .map_err(|e| format!("invalid duration {}: {}", n, e))
        }
        serde_yaml::Value::Tagged(tagged) => parse_duration_value(&tagged.value),
        other => Err(format!("expected duration, got {:?}", other)),
    }
}

pub fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    parse_duration_value(&value).map_err(serde::de::Error::custom)
}
