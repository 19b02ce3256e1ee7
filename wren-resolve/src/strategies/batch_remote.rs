use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use wren_core::{AuthorLookup, BudgetPolicy, Confidence, LookupError, StoreError};

use crate::budget::RateBudget;
use crate::strategy::{AttemptOutcome, Candidate, CostClass, ResolutionItem, ResolutionStrategy};

/// Authoritative remote lookup, many ids per call.
///
/// Every backend call takes one permit from the budget and runs under its
/// own timeout.
pub struct BatchRemoteLookup {
    backend: Arc<dyn AuthorLookup>,
    budget: Arc<RateBudget>,
    policy: BudgetPolicy,
    batch_size: usize,
    timeout: Duration,
}

impl BatchRemoteLookup {
    pub fn new(backend: Arc<dyn AuthorLookup>, budget: Arc<RateBudget>) -> Self {
        Self {
            backend,
            budget,
            policy: BudgetPolicy::Skip,
            batch_size: 100,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_policy(mut self, policy: BudgetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One backend call for one chunk of ids.
    async fn lookup_chunk(&self, chunk: &[ResolutionItem]) -> Vec<AttemptOutcome> {
        let everyone = |outcome: AttemptOutcome| vec![outcome; chunk.len()];

        if let Err(exhausted) = self.budget.acquire(self.policy).await {
            tracing::debug!(
                backend = self.backend.backend(),
                ids = chunk.len(),
                retry_after_ms = exhausted.retry_after.as_millis() as u64,
                "Remote budget exhausted"
            );
            return everyone(AttemptOutcome::BudgetExhausted {
                retry_after: Some(exhausted.retry_after),
            });
        }

        let ids: Vec<String> = chunk.iter().map(|item| item.item_id.clone()).collect();
        match tokio::time::timeout(self.timeout, self.backend.lookup(&ids)).await {
            Ok(Ok(mut found)) => chunk
                .iter()
                .map(|item| match found.remove(&item.item_id) {
                    Some(author) => AttemptOutcome::Found(Candidate::from_remote(
                        author,
                        Confidence::CERTAIN,
                    )),
                    None => AttemptOutcome::NoResult,
                })
                .collect(),
            Ok(Err(LookupError::RateLimited { retry_after_ms, .. })) => {
                let retry_after = retry_after_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.budget.window());
                self.budget.penalize(retry_after);
                everyone(AttemptOutcome::BudgetExhausted {
                    retry_after: Some(retry_after),
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = self.backend.backend(), error = %e, "Remote lookup failed");
                everyone(AttemptOutcome::NoResult)
            }
            Err(_) => {
                tracing::warn!(
                    backend = self.backend.backend(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Remote lookup timed out"
                );
                everyone(AttemptOutcome::TimedOut)
            }
        }
    }
}

#[async_trait]
impl ResolutionStrategy for BatchRemoteLookup {
    fn name(&self) -> &'static str {
        "batch_remote"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::Remote
    }

    fn min_accept(&self) -> Confidence {
        Confidence::CERTAIN
    }

    async fn attempt(&self, item: &ResolutionItem) -> Result<AttemptOutcome, StoreError> {
        Ok(self
            .lookup_chunk(std::slice::from_ref(item))
            .await
            .pop()
            .unwrap_or(AttemptOutcome::NoResult))
    }

    async fn attempt_batch(
        &self,
        items: &[ResolutionItem],
        max_concurrent: usize,
    ) -> Result<Vec<AttemptOutcome>, StoreError> {
        let lookups: Vec<BoxFuture<'_, Vec<AttemptOutcome>>> = items
            .chunks(self.batch_size)
            .map(|chunk| self.lookup_chunk(chunk).boxed())
            .collect();
        let chunks: Vec<Vec<AttemptOutcome>> = stream::iter(lookups)
            .buffered(max_concurrent.max(1))
            .collect()
            .await;
        Ok(chunks.into_iter().flatten().collect())
    }
}
