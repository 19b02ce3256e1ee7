//! The resolution strategy contract.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use wren_core::{Attribution, Confidence, LikedItem, RemoteAuthor, StoreError};

/// An item whose author the pipeline is asked to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionItem {
    pub item_id: String,
    pub text: Option<String>,
    pub known_author_id: Option<String>,
}

impl ResolutionItem {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            text: None,
            known_author_id: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn from_liked(like: &LikedItem) -> Self {
        Self {
            item_id: like.item_id.clone(),
            text: like.text.clone(),
            known_author_id: like.author_id.clone(),
        }
    }
}

/// A proposed attribution, not yet accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub username: String,
    pub display_name: Option<String>,
    pub author_id: Option<String>,
    pub confidence: Confidence,
    /// Strategy-specific detail (pattern name, mirror name).
    pub detail: Option<String>,
}

impl Candidate {
    pub fn new(username: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            username: username.into(),
            display_name: None,
            author_id: None,
            confidence,
            detail: None,
        }
    }

    pub fn from_remote(author: RemoteAuthor, confidence: Confidence) -> Self {
        Self {
            username: author.username,
            display_name: author.display_name,
            author_id: author.author_id,
            confidence,
            detail: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn into_attribution(self, source: &str) -> Attribution {
        Attribution {
            username: self.username,
            display_name: self.display_name,
            author_id: self.author_id,
            confidence: self.confidence,
            source: source.to_string(),
        }
    }
}

/// Result of one strategy attempt on one item.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Found(Candidate),
    NoResult,
    /// The strategy's rate budget had no permit. Try again later.
    BudgetExhausted { retry_after: Option<Duration> },
    /// The backend did not answer in time. Treated like `NoResult`.
    TimedOut,
}

/// Relative cost of a strategy. The pipeline runs cheaper classes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    /// Exact read from the durable store.
    LocalExact,
    /// Read from the in-memory archive snapshot.
    LocalArchive,
    /// Authoritative remote service.
    Remote,
    /// Best-effort secondary sources.
    RemoteBestEffort,
    /// Local guess from item content.
    LocalHeuristic,
}

/// One way of finding an item's author.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    /// Stable name, recorded as the attribution source.
    fn name(&self) -> &'static str;

    fn cost_class(&self) -> CostClass;

    /// Lowest confidence the pipeline accepts from this strategy.
    fn min_accept(&self) -> Confidence;

    /// Whether an accepted result must be written to the durable store.
    /// Only strategies that read the store itself return `false`.
    fn commits_result(&self) -> bool {
        true
    }

    /// Try one item. Only a store failure is an error; every backend problem
    /// is reported as an outcome.
    async fn attempt(&self, item: &ResolutionItem) -> Result<AttemptOutcome, StoreError>;

    /// Try many items, returning one outcome per item in input order.
    ///
    /// The default runs [`ResolutionStrategy::attempt`] with at most
    /// `max_concurrent` attempts in flight.
    async fn attempt_batch(
        &self,
        items: &[ResolutionItem],
        max_concurrent: usize,
    ) -> Result<Vec<AttemptOutcome>, StoreError> {
        // Build the futures up front so the stream holds no borrowing closure.
        let attempts: Vec<BoxFuture<'_, Result<AttemptOutcome, StoreError>>> =
            items.iter().map(|item| self.attempt(item)).collect();
        let outcomes: Vec<Result<AttemptOutcome, StoreError>> = stream::iter(attempts)
            .buffered(max_concurrent.max(1))
            .collect()
            .await;
        outcomes.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_classes_order_cheapest_first() {
        let mut classes = vec![
            CostClass::LocalHeuristic,
            CostClass::Remote,
            CostClass::LocalExact,
            CostClass::RemoteBestEffort,
            CostClass::LocalArchive,
        ];
        classes.sort();
        assert_eq!(
            classes,
            vec![
                CostClass::LocalExact,
                CostClass::LocalArchive,
                CostClass::Remote,
                CostClass::RemoteBestEffort,
                CostClass::LocalHeuristic,
            ]
        );
    }

    #[test]
    fn test_item_from_liked_carries_text() {
        let like = LikedItem::new("9").with_text("RT @alice: hi");
        let item = ResolutionItem::from_liked(&like);
        assert_eq!(item.item_id, "9");
        assert_eq!(item.text.as_deref(), Some("RT @alice: hi"));
    }

    #[test]
    fn test_candidate_into_attribution_records_source() {
        let attribution = Candidate::new("alice", Confidence::new(0.9))
            .with_display_name("Alice")
            .into_attribution("text_pattern");
        assert_eq!(attribution.source, "text_pattern");
        assert_eq!(attribution.display_name.as_deref(), Some("Alice"));
    }
}
