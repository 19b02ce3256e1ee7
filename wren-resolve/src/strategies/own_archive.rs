use std::sync::Arc;

use async_trait::async_trait;
use wren_core::{Confidence, StoreError};
use wren_storage::Snapshot;

use crate::strategy::{AttemptOutcome, Candidate, CostClass, ResolutionItem, ResolutionStrategy};

/// Attributes items from the account's own archive to the account.
///
/// Items in the archive's item table without an author id are the owner's.
pub struct OwnArchiveLookup {
    snapshot: Arc<Snapshot>,
}

impl OwnArchiveLookup {
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ResolutionStrategy for OwnArchiveLookup {
    fn name(&self) -> &'static str {
        "own_archive"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::LocalArchive
    }

    fn min_accept(&self) -> Confidence {
        Confidence::CERTAIN
    }

    async fn attempt(&self, item: &ResolutionItem) -> Result<AttemptOutcome, StoreError> {
        let data = match self.snapshot.current() {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(item_id = %item.item_id, error = %e, "Snapshot cold; skipping archive lookup");
                return Ok(AttemptOutcome::NoResult);
            }
        };
        let (Some(account), Some(own)) = (data.account(), data.get_by_id(&item.item_id)) else {
            return Ok(AttemptOutcome::NoResult);
        };

        let is_own = own
            .author_id
            .as_deref()
            .map_or(true, |author| author == account.account_id);
        if !is_own {
            return Ok(AttemptOutcome::NoResult);
        }

        let mut candidate =
            Candidate::new(account.username.clone(), Confidence::CERTAIN).with_detail("own_item");
        candidate.display_name = account.display_name.clone();
        candidate.author_id = Some(account.account_id.clone());
        Ok(AttemptOutcome::Found(candidate))
    }
}
