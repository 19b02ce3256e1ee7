//! Summary of a bulk enrichment run.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::pipeline::ResolutionOutcome;

/// Counts from one [`crate::AuthorResolver::resolve_unattributed`] run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentReport {
    pub attempted: usize,
    /// Accepted attributions per strategy name.
    pub accepted: BTreeMap<String, usize>,
    /// Items no strategy could attribute.
    pub exhausted: usize,
    /// Exhausted items where at least one strategy was skipped for budget.
    pub deferred: usize,
    pub total_likes: usize,
    pub attributed_likes: usize,
    /// `attributed_likes / total_likes`, zero when there are no likes.
    pub coverage: f64,
    pub elapsed_ms: u64,
}

impl EnrichmentReport {
    pub(crate) fn from_outcomes(
        outcomes: &HashMap<String, ResolutionOutcome>,
        total_likes: usize,
        attributed_likes: usize,
        elapsed_ms: u64,
    ) -> Self {
        let mut accepted = BTreeMap::new();
        let mut exhausted = 0;
        let mut deferred = 0;
        for outcome in outcomes.values() {
            match outcome {
                ResolutionOutcome::Accepted(attribution) => {
                    *accepted.entry(attribution.source.clone()).or_insert(0) += 1;
                }
                ResolutionOutcome::Exhausted { deferred: skipped } => {
                    exhausted += 1;
                    if !skipped.is_empty() {
                        deferred += 1;
                    }
                }
            }
        }

        let coverage = if total_likes == 0 {
            0.0
        } else {
            attributed_likes as f64 / total_likes as f64
        };

        Self {
            attempted: outcomes.len(),
            accepted,
            exhausted,
            deferred,
            total_likes,
            attributed_likes,
            coverage,
            elapsed_ms,
        }
    }

    pub fn accepted_total(&self) -> usize {
        self.accepted.values().sum()
    }
}

impl fmt::Display for EnrichmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempted, {} attributed, {} exhausted ({} deferred), coverage {:.1}%",
            self.attempted,
            self.accepted_total(),
            self.exhausted,
            self.deferred,
            self.coverage * 100.0
        )
    }
}
