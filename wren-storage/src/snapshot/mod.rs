//! In-memory snapshot of the archive.
//!
//! A full load of the archive plus derived indexes (by author, by parent,
//! membership sets). The snapshot is a read replica: callers never write
//! through it. The resolver patches single liked records after it has
//! committed an attribution to the durable store.
//!
//! Loads run under a dedicated mutex and build the new generation without
//! holding the state lock, so readers keep seeing the previous generation
//! until the swap. A failed load leaves the snapshot cold and every read
//! returns [`SnapshotError::Unavailable`].
//!
//! With an attribution store attached, every load replays the live records
//! of [`Partition::Attribution`] onto the new generation, so attributions
//! committed since the archive was written survive a reload.

mod data;

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use wren_core::{
    AccountRecord, ArchiveSource, Attribution, AttributionRecord, ContentItem, LikedItem,
    MembershipSet, Partition, SharedClock, SnapshotError, StoreError, UserRecord,
};

use crate::cache::TtlStore;

pub use data::{SnapshotData, SnapshotStats};

enum SnapshotState {
    Cold { reason: String },
    Loaded(Arc<SnapshotData>),
}

/// Loadable, reloadable read replica over an [`ArchiveSource`].
pub struct Snapshot {
    source: Arc<dyn ArchiveSource>,
    clock: SharedClock,
    attributions: Option<Arc<dyn TtlStore>>,
    state: RwLock<SnapshotState>,
    load_lock: Mutex<()>,
}

impl Snapshot {
    /// Create a cold snapshot. Nothing is read until [`Snapshot::load_all`].
    pub fn new(source: Arc<dyn ArchiveSource>, clock: SharedClock) -> Self {
        Self {
            source,
            clock,
            attributions: None,
            state: RwLock::new(SnapshotState::Cold {
                reason: "snapshot not loaded".to_string(),
            }),
            load_lock: Mutex::new(()),
        }
    }

    /// Replay committed attributions from `store` on every load.
    pub fn with_attribution_store(mut self, store: Arc<dyn TtlStore>) -> Self {
        self.attributions = Some(store);
        self
    }

    /// Load the archive if the snapshot is cold. A loaded snapshot is left
    /// untouched.
    pub fn load_all(&self) -> Result<SnapshotStats, SnapshotError> {
        let _guard = self.load_lock.lock().map_err(|_| SnapshotError::LockPoisoned)?;
        if let Ok(current) = self.current() {
            return Ok(current.stats());
        }
        self.load_locked()
    }

    /// Rebuild from the archive unconditionally.
    pub fn reload(&self) -> Result<SnapshotStats, SnapshotError> {
        let _guard = self.load_lock.lock().map_err(|_| SnapshotError::LockPoisoned)?;
        self.load_locked()
    }

    fn load_locked(&self) -> Result<SnapshotStats, SnapshotError> {
        let started = Instant::now();
        let rows = match self.source.load_rows() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot load failed; snapshot is cold");
                self.swap(SnapshotState::Cold {
                    reason: e.to_string(),
                })?;
                return Err(SnapshotError::Load(e));
            }
        };

        let data = SnapshotData::build(rows, self.clock.now(), started.elapsed());
        let replayed = match self.replay_attributions(&data) {
            Ok(replayed) => replayed,
            Err(e) => {
                tracing::warn!(error = %e, "Attribution replay failed; snapshot is cold");
                self.swap(SnapshotState::Cold {
                    reason: e.to_string(),
                })?;
                return Err(SnapshotError::Overlay(e));
            }
        };
        let stats = data.stats();
        self.swap(SnapshotState::Loaded(Arc::new(data)))?;

        tracing::info!(
            items = stats.items,
            likes = stats.likes,
            users = stats.users,
            authors = stats.authors,
            replayed,
            duration_ms = stats.load_duration_ms,
            "Snapshot loaded"
        );
        Ok(stats)
    }

    /// Patch the new generation with every live committed attribution.
    /// Records for ids the archive does not contain are skipped.
    fn replay_attributions(&self, data: &SnapshotData) -> Result<usize, StoreError> {
        let Some(store) = &self.attributions else {
            return Ok(0);
        };

        let mut replayed = 0;
        for entry in store.live_entries(Partition::Attribution)? {
            let record: AttributionRecord = match serde_json::from_slice(&entry.payload) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "Skipping undecodable attribution");
                    continue;
                }
            };
            if data.apply_attribution(&entry.key, &record.attribution) {
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    fn swap(&self, next: SnapshotState) -> Result<(), SnapshotError> {
        let mut state = self.state.write().map_err(|_| SnapshotError::LockPoisoned)?;
        *state = next;
        Ok(())
    }

    /// The current generation. Holding the returned `Arc` gives a consistent
    /// view across several reads even if a reload swaps in a new generation.
    pub fn current(&self) -> Result<Arc<SnapshotData>, SnapshotError> {
        let state = self.state.read().map_err(|_| SnapshotError::LockPoisoned)?;
        match &*state {
            SnapshotState::Loaded(data) => Ok(Arc::clone(data)),
            SnapshotState::Cold { reason } => Err(SnapshotError::Unavailable {
                reason: reason.clone(),
            }),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_ok()
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<ContentItem>, SnapshotError> {
        Ok(self.current()?.get_by_id(id).cloned())
    }

    pub fn get_by_author(
        &self,
        author_id: &str,
        limit: usize,
    ) -> Result<Vec<ContentItem>, SnapshotError> {
        Ok(self.current()?.get_by_author(author_id, limit))
    }

    pub fn get_replies_to(&self, id: &str) -> Result<Vec<ContentItem>, SnapshotError> {
        Ok(self.current()?.get_replies_to(id))
    }

    pub fn recent_items(&self, limit: usize) -> Result<Vec<ContentItem>, SnapshotError> {
        Ok(self.current()?.recent_items(limit))
    }

    pub fn zero_engagement(&self, author_id: &str) -> Result<Vec<ContentItem>, SnapshotError> {
        Ok(self.current()?.zero_engagement(author_id))
    }

    pub fn conversation_chain(
        &self,
        id: &str,
        max_depth: usize,
    ) -> Result<Vec<ContentItem>, SnapshotError> {
        Ok(self.current()?.conversation_chain(id, max_depth))
    }

    pub fn get_liked(&self, item_id: &str) -> Result<Option<LikedItem>, SnapshotError> {
        Ok(self.current()?.get_liked(item_id))
    }

    pub fn liked_items(&self, limit: usize) -> Result<Vec<LikedItem>, SnapshotError> {
        Ok(self.current()?.liked_items(limit))
    }

    pub fn unattributed_likes(&self, limit: usize) -> Result<Vec<LikedItem>, SnapshotError> {
        Ok(self.current()?.unattributed_likes(limit))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRecord>, SnapshotError> {
        Ok(self.current()?.get_user(id).cloned())
    }

    pub fn account(&self) -> Result<Option<AccountRecord>, SnapshotError> {
        Ok(self.current()?.account().cloned())
    }

    pub fn is_member(&self, set: MembershipSet, id: &str) -> Result<bool, SnapshotError> {
        Ok(self.current()?.is_member(set, id))
    }

    pub fn attribution_for(&self, item_id: &str) -> Result<Option<Attribution>, SnapshotError> {
        Ok(self.current()?.attribution_for(item_id))
    }

    pub fn stats(&self) -> Result<SnapshotStats, SnapshotError> {
        Ok(self.current()?.stats())
    }

    /// Patch one record in the current generation. Returns `false` when the
    /// item is unknown to the snapshot.
    pub fn apply_attribution(
        &self,
        item_id: &str,
        attribution: &Attribution,
    ) -> Result<bool, SnapshotError> {
        Ok(self.current()?.apply_attribution(item_id, attribution))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
