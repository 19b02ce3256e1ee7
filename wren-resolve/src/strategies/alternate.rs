use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wren_core::{BudgetPolicy, Confidence, LookupError, MirrorLookup, StoreError};

use crate::budget::RateBudget;
use crate::strategy::{AttemptOutcome, Candidate, CostClass, ResolutionItem, ResolutionStrategy};

/// Best-effort lookup against an ordered list of mirrors.
///
/// Mirrors are tried in order until one answers. Each call consumes a permit
/// from the strategy's shared budget and runs under its own timeout.
pub struct AlternateSourceLookup {
    mirrors: Vec<Arc<dyn MirrorLookup>>,
    budget: Arc<RateBudget>,
    policy: BudgetPolicy,
    timeout: Duration,
    confidence: Confidence,
    min_accept: Confidence,
}

impl AlternateSourceLookup {
    pub fn new(mirrors: Vec<Arc<dyn MirrorLookup>>, budget: Arc<RateBudget>) -> Self {
        Self {
            mirrors,
            budget,
            policy: BudgetPolicy::Skip,
            timeout: Duration::from_secs(10),
            confidence: Confidence::new(0.8),
            min_accept: Confidence::new(0.7),
        }
    }

    pub fn with_policy(mut self, policy: BudgetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence, min_accept: Confidence) -> Self {
        self.confidence = confidence;
        self.min_accept = min_accept;
        self
    }
}

#[async_trait]
impl ResolutionStrategy for AlternateSourceLookup {
    fn name(&self) -> &'static str {
        "alternate_source"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::RemoteBestEffort
    }

    fn min_accept(&self) -> Confidence {
        self.min_accept
    }

    async fn attempt(&self, item: &ResolutionItem) -> Result<AttemptOutcome, StoreError> {
        let mut timed_out = false;
        let mut rate_limited: Option<Duration> = None;

        for mirror in &self.mirrors {
            if let Err(exhausted) = self.budget.acquire(self.policy).await {
                return Ok(AttemptOutcome::BudgetExhausted {
                    retry_after: Some(exhausted.retry_after),
                });
            }

            match tokio::time::timeout(self.timeout, mirror.lookup(&item.item_id)).await {
                Ok(Ok(Some(author))) => {
                    tracing::debug!(item_id = %item.item_id, mirror = mirror.mirror(), "Mirror answered");
                    return Ok(AttemptOutcome::Found(
                        Candidate::from_remote(author, self.confidence).with_detail(mirror.mirror()),
                    ));
                }
                Ok(Ok(None)) => {}
                Ok(Err(LookupError::RateLimited { retry_after_ms, .. })) => {
                    let hint = retry_after_ms.map(Duration::from_millis).unwrap_or(self.budget.window());
                    rate_limited = Some(rate_limited.map_or(hint, |seen| seen.max(hint)));
                    tracing::warn!(mirror = mirror.mirror(), "Mirror rate limited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(mirror = mirror.mirror(), error = %e, "Mirror lookup failed");
                }
                Err(_) => {
                    timed_out = true;
                    tracing::warn!(mirror = mirror.mirror(), "Mirror lookup timed out");
                }
            }
        }

        Ok(match (rate_limited, timed_out) {
            (Some(retry_after), _) => AttemptOutcome::BudgetExhausted {
                retry_after: Some(retry_after),
            },
            (None, true) => AttemptOutcome::TimedOut,
            (None, false) => AttemptOutcome::NoResult,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::RemoteAuthor;
    use wren_test_utils::ScriptedMirror;

    fn budget(capacity: u32) -> Arc<RateBudget> {
        Arc::new(RateBudget::new("mirror", capacity, Duration::from_secs(60)).expect("budget"))
    }

    #[tokio::test]
    async fn test_first_answering_mirror_wins() {
        let empty = Arc::new(ScriptedMirror::new("nitter-a"));
        let answering =
            Arc::new(ScriptedMirror::new("nitter-b").with_author("1", RemoteAuthor::new("alice")));
        let unused = Arc::new(ScriptedMirror::new("nitter-c").with_author("1", RemoteAuthor::new("mallory")));
        let mirrors: Vec<Arc<dyn MirrorLookup>> =
            vec![empty.clone(), answering.clone(), unused.clone()];
        let lookup = AlternateSourceLookup::new(mirrors, budget(20));

        match lookup.attempt(&ResolutionItem::new("1")).await.expect("attempt") {
            AttemptOutcome::Found(candidate) => {
                assert_eq!(candidate.username, "alice");
                assert_eq!(candidate.detail.as_deref(), Some("nitter-b"));
                assert_eq!(candidate.confidence, Confidence::new(0.8));
            }
            other => panic!("expected mirror hit, got {:?}", other),
        }
        assert_eq!((empty.calls(), answering.calls(), unused.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_each_mirror_call_spends_a_permit() {
        let a = Arc::new(ScriptedMirror::new("a"));
        let b = Arc::new(ScriptedMirror::new("b"));
        let mirrors: Vec<Arc<dyn MirrorLookup>> = vec![a.clone(), b.clone()];
        let lookup = AlternateSourceLookup::new(mirrors, budget(1));

        assert!(matches!(
            lookup.attempt(&ResolutionItem::new("1")).await.expect("attempt"),
            AttemptOutcome::BudgetExhausted { .. }
        ));
        assert_eq!((a.calls(), b.calls()), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_timeout_is_reported() {
        let slow = Arc::new(
            ScriptedMirror::new("slow")
                .with_author("1", RemoteAuthor::new("alice"))
                .with_delay(Duration::from_secs(60)),
        );
        let mirrors: Vec<Arc<dyn MirrorLookup>> = vec![slow];
        let lookup = AlternateSourceLookup::new(mirrors, budget(5))
            .with_timeout(Duration::from_secs(1));
        assert_eq!(
            lookup.attempt(&ResolutionItem::new("1")).await.expect("attempt"),
            AttemptOutcome::TimedOut
        );
    }
}
