//! Author resolution pipeline.
//!
//! Strategies run in ascending cost order. The first candidate meeting its
//! strategy's threshold is accepted, committed to the `attribution`
//! partition of the durable store, and then patched into the snapshot when
//! one is loaded. Budget and backend problems only move the pipeline on to
//! the next strategy; store failures abort the call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use wren_core::{
    Attribution, AttributionRecord, AuthorLookup, BudgetPolicy, Confidence, ConfigError,
    MirrorLookup, Partition, ResolveError, ResolverConfig, SharedClock, SnapshotError,
    SystemClock,
};
use wren_storage::{Snapshot, TtlStore, TtlStoreExt};

use crate::budget::RateBudget;
use crate::report::EnrichmentReport;
use crate::strategies::{
    AlternateSourceLookup, BatchRemoteLookup, CachedLookup, OwnArchiveLookup,
    TextPatternExtraction,
};
use crate::strategy::{AttemptOutcome, Candidate, ResolutionItem, ResolutionStrategy};

/// Final result of resolving one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Accepted(Attribution),
    /// No strategy produced an acceptable candidate. `deferred` lists the
    /// strategies skipped because their budget was exhausted; a non-empty
    /// list means the item may resolve on a later call.
    Exhausted { deferred: Vec<String> },
}

impl ResolutionOutcome {
    pub fn attribution(&self) -> Option<&Attribution> {
        match self {
            ResolutionOutcome::Accepted(attribution) => Some(attribution),
            ResolutionOutcome::Exhausted { .. } => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, ResolutionOutcome::Exhausted { deferred } if !deferred.is_empty())
    }
}

/// One strategy attempt as seen by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionAttempt {
    pub strategy: &'static str,
    pub outcome: AttemptOutcome,
    pub accepted: bool,
}

/// Cooperative cancellation for batch resolution.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs resolution strategies and commits accepted attributions.
pub struct AuthorResolver {
    store: Arc<dyn TtlStore>,
    snapshot: Option<Arc<Snapshot>>,
    strategies: Vec<Arc<dyn ResolutionStrategy>>,
    clock: SharedClock,
    max_concurrent: usize,
}

impl AuthorResolver {
    pub fn builder(store: Arc<dyn TtlStore>) -> AuthorResolverBuilder {
        AuthorResolverBuilder::new(store)
    }

    /// Assemble a resolver from an explicit strategy set, sorted by cost
    /// class. Strategies of equal class keep their given order.
    pub fn with_strategies(
        store: Arc<dyn TtlStore>,
        snapshot: Option<Arc<Snapshot>>,
        mut strategies: Vec<Arc<dyn ResolutionStrategy>>,
        clock: SharedClock,
    ) -> Self {
        strategies.sort_by_key(|strategy| strategy.cost_class());
        Self {
            store,
            snapshot,
            strategies,
            clock,
            max_concurrent: 4,
        }
    }

    /// Strategy names in the order they run.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        self.snapshot.as_ref()
    }

    pub async fn resolve(&self, item: &ResolutionItem) -> Result<ResolutionOutcome, ResolveError> {
        Ok(self.resolve_traced(item).await?.0)
    }

    /// Like [`AuthorResolver::resolve`], also returning every attempt made.
    pub async fn resolve_traced(
        &self,
        item: &ResolutionItem,
    ) -> Result<(ResolutionOutcome, Vec<ResolutionAttempt>), ResolveError> {
        let mut attempts = Vec::new();
        let mut deferred = Vec::new();

        for strategy in &self.strategies {
            let outcome = strategy.attempt(item).await?;
            tracing::debug!(
                item_id = %item.item_id,
                strategy = strategy.name(),
                outcome = ?outcome,
                "Resolution attempt"
            );

            if let AttemptOutcome::BudgetExhausted { .. } = outcome {
                deferred.push(strategy.name().to_string());
            }
            let accepted = acceptable(strategy.as_ref(), &outcome);
            attempts.push(ResolutionAttempt {
                strategy: strategy.name(),
                outcome,
                accepted: accepted.is_some(),
            });

            if let Some(candidate) = accepted {
                let attribution = self.commit(item, strategy.as_ref(), candidate)?;
                return Ok((ResolutionOutcome::Accepted(attribution), attempts));
            }
        }

        tracing::debug!(item_id = %item.item_id, deferred = deferred.len(), "Resolution exhausted");
        Ok((ResolutionOutcome::Exhausted { deferred }, attempts))
    }

    /// Resolve many items, one strategy stage at a time.
    ///
    /// Duplicate ids are resolved once.
    pub async fn resolve_batch(
        &self,
        items: &[ResolutionItem],
        max_concurrent: usize,
    ) -> Result<HashMap<String, ResolutionOutcome>, ResolveError> {
        self.resolve_batch_cancellable(items, max_concurrent, &CancelToken::new())
            .await
    }

    /// [`AuthorResolver::resolve_batch`] that stops between stages once
    /// `cancel` is set. Results accepted before cancellation stay committed.
    pub async fn resolve_batch_cancellable(
        &self,
        items: &[ResolutionItem],
        max_concurrent: usize,
        cancel: &CancelToken,
    ) -> Result<HashMap<String, ResolutionOutcome>, ResolveError> {
        let mut seen = HashSet::new();
        let mut pending: Vec<ResolutionItem> = items
            .iter()
            .filter(|item| seen.insert(item.item_id.clone()))
            .cloned()
            .collect();

        let mut results = HashMap::with_capacity(pending.len());
        let mut deferred: HashMap<String, Vec<String>> = HashMap::new();

        for strategy in &self.strategies {
            if pending.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                tracing::info!(committed = results.len(), pending = pending.len(), "Batch resolution cancelled");
                return Err(ResolveError::Cancelled {
                    committed: results.len(),
                });
            }

            let outcomes = strategy.attempt_batch(&pending, max_concurrent).await?;
            let outcomes = outcomes
                .into_iter()
                .chain(std::iter::repeat_with(|| AttemptOutcome::NoResult));

            let mut unresolved = Vec::new();
            for (item, outcome) in pending.into_iter().zip(outcomes) {
                if let AttemptOutcome::BudgetExhausted { .. } = outcome {
                    deferred
                        .entry(item.item_id.clone())
                        .or_default()
                        .push(strategy.name().to_string());
                }
                match acceptable(strategy.as_ref(), &outcome) {
                    Some(candidate) => {
                        let attribution = self.commit(&item, strategy.as_ref(), candidate)?;
                        results.insert(item.item_id, ResolutionOutcome::Accepted(attribution));
                    }
                    None => unresolved.push(item),
                }
            }
            tracing::debug!(
                strategy = strategy.name(),
                resolved = results.len(),
                remaining = unresolved.len(),
                "Strategy stage finished"
            );
            pending = unresolved;
        }

        for item in pending {
            let skipped = deferred.remove(&item.item_id).unwrap_or_default();
            results.insert(item.item_id, ResolutionOutcome::Exhausted { deferred: skipped });
        }
        Ok(results)
    }

    /// Resolve up to `limit` of the snapshot's unattributed likes.
    pub async fn resolve_unattributed(
        &self,
        limit: usize,
        max_concurrent: usize,
    ) -> Result<EnrichmentReport, ResolveError> {
        let snapshot = self.snapshot.as_ref().ok_or(ResolveError::NoSnapshot)?;
        let started = Instant::now();

        let items: Vec<ResolutionItem> = snapshot
            .unattributed_likes(limit)?
            .iter()
            .map(ResolutionItem::from_liked)
            .collect();
        let outcomes = self.resolve_batch(&items, max_concurrent).await?;

        let data = snapshot.current()?;
        let total_likes = data.stats().likes;
        let attributed_likes = total_likes - data.unattributed_likes(usize::MAX).len();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let report =
            EnrichmentReport::from_outcomes(&outcomes, total_likes, attributed_likes, elapsed_ms);
        tracing::info!(%report, "Enrichment finished");
        Ok(report)
    }

    /// Resolve with the configured concurrency.
    pub async fn resolve_all(
        &self,
        items: &[ResolutionItem],
    ) -> Result<HashMap<String, ResolutionOutcome>, ResolveError> {
        self.resolve_batch(items, self.max_concurrent).await
    }

    fn commit(
        &self,
        item: &ResolutionItem,
        strategy: &dyn ResolutionStrategy,
        candidate: Candidate,
    ) -> Result<Attribution, ResolveError> {
        let detail = candidate.detail.clone();
        let attribution = candidate.into_attribution(strategy.name());

        if strategy.commits_result() {
            let record = AttributionRecord {
                item_id: item.item_id.clone(),
                attribution: attribution.clone(),
                detail,
                resolved_at: self.clock.now(),
            };
            self.store
                .set_json(Partition::Attribution, &item.item_id, &record)?;
            tracing::info!(
                item_id = %item.item_id,
                strategy = strategy.name(),
                username = %attribution.username,
                confidence = %attribution.confidence,
                "Attribution accepted"
            );
        }

        if let Some(snapshot) = &self.snapshot {
            match snapshot.apply_attribution(&item.item_id, &attribution) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(item_id = %item.item_id, "Item not in snapshot; nothing to patch");
                }
                Err(SnapshotError::Unavailable { .. }) => {
                    tracing::debug!(item_id = %item.item_id, "Snapshot cold; patch skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(attribution)
    }
}

impl std::fmt::Debug for AuthorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorResolver")
            .field("strategies", &self.strategy_names())
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

fn acceptable(strategy: &dyn ResolutionStrategy, outcome: &AttemptOutcome) -> Option<Candidate> {
    match outcome {
        AttemptOutcome::Found(candidate) if candidate.confidence.meets(strategy.min_accept()) => {
            Some(candidate.clone())
        }
        _ => None,
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles the built-in strategies from a [`ResolverConfig`].
pub struct AuthorResolverBuilder {
    store: Arc<dyn TtlStore>,
    config: ResolverConfig,
    clock: Option<SharedClock>,
    snapshot: Option<Arc<Snapshot>>,
    remote: Option<Arc<dyn AuthorLookup>>,
    mirrors: Vec<Arc<dyn MirrorLookup>>,
    extra: Vec<Arc<dyn ResolutionStrategy>>,
}

impl AuthorResolverBuilder {
    fn new(store: Arc<dyn TtlStore>) -> Self {
        Self {
            store,
            config: ResolverConfig::default(),
            clock: None,
            snapshot: None,
            remote: None,
            mirrors: Vec::new(),
            extra: Vec::new(),
        }
    }

    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn snapshot(mut self, snapshot: Arc<Snapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn remote(mut self, backend: Arc<dyn AuthorLookup>) -> Self {
        self.remote = Some(backend);
        self
    }

    pub fn mirror(mut self, mirror: Arc<dyn MirrorLookup>) -> Self {
        self.mirrors.push(mirror);
        self
    }

    /// Add a custom strategy next to the built-in ones.
    pub fn strategy(mut self, strategy: Arc<dyn ResolutionStrategy>) -> Self {
        self.extra.push(strategy);
        self
    }

    pub fn build(self) -> Result<AuthorResolver, ConfigError> {
        let config = self.config;
        let policy: BudgetPolicy = config.budget_policy;
        check_confidence("resolver.mirror_confidence", config.mirror_confidence)?;
        check_confidence("resolver.mirror_min_accept", config.mirror_min_accept)?;
        check_confidence("resolver.text_pattern_min_accept", config.text_pattern_min_accept)?;
        if config.remote_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "resolver.remote_batch_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let mut strategies: Vec<Arc<dyn ResolutionStrategy>> =
            vec![Arc::new(CachedLookup::new(Arc::clone(&self.store)))];

        if let Some(snapshot) = &self.snapshot {
            strategies.push(Arc::new(OwnArchiveLookup::new(Arc::clone(snapshot))));
        }

        if let Some(backend) = self.remote {
            let budget = RateBudget::new("remote", config.remote_capacity, config.remote_window())?;
            strategies.push(Arc::new(
                BatchRemoteLookup::new(backend, Arc::new(budget))
                    .with_policy(policy)
                    .with_batch_size(config.remote_batch_size)
                    .with_timeout(config.remote_timeout()),
            ));
        }

        if !self.mirrors.is_empty() {
            let budget = RateBudget::new("mirror", config.mirror_capacity, config.mirror_window())?;
            strategies.push(Arc::new(
                AlternateSourceLookup::new(self.mirrors, Arc::new(budget))
                    .with_policy(policy)
                    .with_timeout(config.mirror_timeout())
                    .with_confidence(
                        Confidence::new(config.mirror_confidence),
                        Confidence::new(config.mirror_min_accept),
                    ),
            ));
        }

        strategies.push(Arc::new(TextPatternExtraction::new(Confidence::new(
            config.text_pattern_min_accept,
        ))));
        strategies.extend(self.extra);

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let mut resolver =
            AuthorResolver::with_strategies(self.store, self.snapshot, strategies, clock);
        resolver.max_concurrent = config.max_concurrent.max(1);

        tracing::info!(strategies = ?resolver.strategy_names(), "Author resolver ready");
        Ok(resolver)
    }
}

fn check_confidence(field: &str, value: f64) -> Result<(), ConfigError> {
    Confidence::try_from(value)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be within [0, 1]".to_string(),
        })
}
