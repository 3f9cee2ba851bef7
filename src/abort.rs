//! Merging of cancellation sources.
//!
//! A run can be aborted from several places (the host's abort request, a
//! caller-supplied token, Ctrl-C). [`combine`] folds them into one token that
//! trips as soon as any source trips. A source that is already tripped when
//! combined trips the result before `combine` returns.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A token tripped by any of its sources. Dropping it stops the forwarders.
#[derive(Debug)]
pub struct CombinedToken {
    token: CancellationToken,
    sources: Vec<CancellationToken>,
    forwarders: Vec<JoinHandle<()>>,
}

impl CombinedToken {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Also polls the sources directly, so a trip is visible here before the
    /// forwarder task has run.
    pub fn is_cancelled(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        if self.sources.iter().any(|s| s.is_cancelled()) {
            self.token.cancel();
            return true;
        }
        false
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Drop for CombinedToken {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

/// Must be called from within a tokio runtime.
pub fn combine<'a>(sources: impl IntoIterator<Item = &'a CancellationToken>) -> CombinedToken {
    let token = CancellationToken::new();
    let mut kept = Vec::new();
    let mut forwarders = Vec::new();

    for source in sources {
        if source.is_cancelled() {
            token.cancel();
            continue;
        }

        kept.push(source.clone());
        let source = source.clone();
        let merged = token.clone();
        forwarders.push(tokio::spawn(async move {
            tokio::select! {
                _ = source.cancelled() => merged.cancel(),
                _ = merged.cancelled() => {}
            }
        }));
    }

    CombinedToken {
        token,
        sources: kept,
        forwarders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn already_tripped_source_trips_immediately() {
        let tripped = CancellationToken::new();
        tripped.cancel();
        let fresh = CancellationToken::new();

        let combined = combine([&tripped, &fresh]);
        assert!(combined.is_cancelled());
        assert!(!fresh.is_cancelled());
    }

    #[tokio::test]
    async fn trips_when_any_source_trips_later() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let combined = combine([&a, &b]);
        assert!(!combined.is_cancelled());

        b.cancel();
        tokio::time::timeout(Duration::from_secs(1), combined.cancelled())
            .await
            .expect("combined token should trip");
        assert!(!a.is_cancelled());
    }

    #[tokio::test]
    async fn is_cancelled_sees_a_source_before_forwarding() {
        let source = CancellationToken::new();
        let combined = combine([&source]);
        source.cancel();
        // no yield point between the two calls
        assert!(combined.is_cancelled());
        assert!(combined.token().is_cancelled());
    }

    #[tokio::test]
    async fn child_tokens_follow_the_combination() {
        let source = CancellationToken::new();
        let combined = combine([&source]);
        let child = combined.token().child_token();

        source.cancel();
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should trip with its parent");
    }

    #[tokio::test]
    async fn empty_combination_never_trips_on_its_own() {
        let combined = combine(std::iter::empty());
        assert!(!combined.is_cancelled());
        combined.token().cancel();
        assert!(combined.is_cancelled());
    }
}
