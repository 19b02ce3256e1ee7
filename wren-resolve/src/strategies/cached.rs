use std::sync::Arc;

use async_trait::async_trait;
use wren_core::{AttributionRecord, Confidence, Partition, StoreError};
use wren_storage::{TtlStore, TtlStoreExt};

use crate::strategy::{AttemptOutcome, Candidate, CostClass, ResolutionItem, ResolutionStrategy};

/// Reads attributions committed by earlier resolutions.
pub struct CachedLookup {
    store: Arc<dyn TtlStore>,
}

impl CachedLookup {
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResolutionStrategy for CachedLookup {
    fn name(&self) -> &'static str {
        "cached"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::LocalExact
    }

    fn min_accept(&self) -> Confidence {
        Confidence::CERTAIN
    }

    fn commits_result(&self) -> bool {
        false
    }

    async fn attempt(&self, item: &ResolutionItem) -> Result<AttemptOutcome, StoreError> {
        let record: Option<AttributionRecord> =
            self.store.get_json(Partition::Attribution, &item.item_id)?;

        Ok(match record {
            Some(record) => {
                let attribution = record.attribution;
                let mut candidate = Candidate::new(attribution.username, Confidence::CERTAIN)
                    .with_detail(attribution.source);
                candidate.display_name = attribution.display_name;
                candidate.author_id = attribution.author_id;
                AttemptOutcome::Found(candidate)
            }
            None => AttemptOutcome::NoResult,
        })
    }
}
