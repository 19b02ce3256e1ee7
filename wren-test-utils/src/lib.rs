//! WREN Test Utilities
//!
//! Shared test infrastructure for the wren workspace:
//! - Scripted lookup backends with call counters
//! - A store that fails on demand
//! - Archive fixtures and snapshot helpers
//! - Proptest generators for archive records

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wren_core::{
    AuthorLookup, LookupError, MirrorLookup, Partition, PartitionPolicies, RemoteAuthor,
    StoreError,
};
use wren_storage::{CacheEntry, StoreStats, TtlStore};

pub use wren_core::{
    AccountRecord, ArchiveRows, Attribution, Confidence, ContentItem, LikedItem, ManualClock,
    MemoryArchive,
};

// ============================================================================
// SCRIPTED BACKENDS
// ============================================================================

/// [`AuthorLookup`] that answers from a fixed table.
#[derive(Debug)]
pub struct ScriptedAuthorLookup {
    name: String,
    authors: HashMap<String, RemoteAuthor>,
    error: Mutex<Option<LookupError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
}

impl ScriptedAuthorLookup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authors: HashMap::new(),
            error: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_author(mut self, id: impl Into<String>, author: RemoteAuthor) -> Self {
        self.authors.insert(id.into(), author);
        self
    }

    /// Fail every call with `error` until [`ScriptedAuthorLookup::clear_error`].
    pub fn with_error(self, error: LookupError) -> Self {
        self.set_error(Some(error));
        self
    }

    /// Sleep this long (tokio time) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_error(&self, error: Option<LookupError>) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    pub fn clear_error(&self) {
        self.set_error(None);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ids of every call, in call order.
    pub fn requested_ids(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AuthorLookup for ScriptedAuthorLookup {
    fn backend(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, ids: &[String]) -> Result<HashMap<String, RemoteAuthor>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ids.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted_error = self.error.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(error) = scripted_error {
            return Err(error);
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.authors.get(id).map(|a| (id.clone(), a.clone())))
            .collect())
    }
}

/// [`MirrorLookup`] that answers from a fixed table.
#[derive(Debug)]
pub struct ScriptedMirror {
    name: String,
    authors: HashMap<String, RemoteAuthor>,
    error: Mutex<Option<LookupError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedMirror {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authors: HashMap::new(),
            error: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_author(mut self, id: impl Into<String>, author: RemoteAuthor) -> Self {
        self.authors.insert(id.into(), author);
        self
    }

    pub fn with_error(self, error: LookupError) -> Self {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MirrorLookup for ScriptedMirror {
    fn mirror(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, id: &str) -> Result<Option<RemoteAuthor>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted_error = self.error.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match scripted_error {
            Some(error) => Err(error),
            None => Ok(self.authors.get(id).cloned()),
        }
    }
}

// ============================================================================
// FAILING STORE
// ============================================================================

/// [`TtlStore`] whose operations fail with a transaction error.
#[derive(Debug)]
pub struct FailingStore {
    policies: PartitionPolicies,
    fail_reads: bool,
    writes_attempted: AtomicUsize,
}

impl FailingStore {
    /// Every operation fails.
    pub fn new() -> Self {
        Self {
            policies: PartitionPolicies::default(),
            fail_reads: true,
            writes_attempted: AtomicUsize::new(0),
        }
    }

    /// Reads miss, writes fail.
    pub fn failing_writes() -> Self {
        Self {
            fail_reads: false,
            ..Self::new()
        }
    }

    pub fn writes_attempted(&self) -> usize {
        self.writes_attempted.load(Ordering::SeqCst)
    }

    fn failure(partition: Partition) -> StoreError {
        StoreError::Transaction {
            table: partition.to_string(),
            reason: "injected failure".to_string(),
        }
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlStore for FailingStore {
    fn get_entry(&self, partition: Partition, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
        if self.fail_reads {
            Err(Self::failure(partition))
        } else {
            Ok(None)
        }
    }

    fn live_entries(&self, partition: Partition) -> Result<Vec<CacheEntry>, StoreError> {
        if self.fail_reads {
            Err(Self::failure(partition))
        } else {
            Ok(Vec::new())
        }
    }

    fn set(&self, partition: Partition, _key: &str, _payload: Vec<u8>) -> Result<(), StoreError> {
        self.writes_attempted.fetch_add(1, Ordering::SeqCst);
        Err(Self::failure(partition))
    }

    fn set_many(
        &self,
        partition: Partition,
        _entries: Vec<(String, Vec<u8>)>,
    ) -> Result<usize, StoreError> {
        self.writes_attempted.fetch_add(1, Ordering::SeqCst);
        Err(Self::failure(partition))
    }

    fn evict(&self, partition: Partition, _key: &str) -> Result<bool, StoreError> {
        Err(Self::failure(partition))
    }

    fn sweep(&self, partition: Partition) -> Result<usize, StoreError> {
        Err(Self::failure(partition))
    }

    fn stats(&self, _partition: Partition) -> StoreStats {
        StoreStats::default()
    }

    fn policies(&self) -> &PartitionPolicies {
        &self.policies
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for archive records.

    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    pub fn arb_partition() -> impl Strategy<Value = Partition> {
        prop::sample::select(Partition::ALL.to_vec())
    }

    pub fn arb_confidence() -> impl Strategy<Value = Confidence> {
        (0.0f64..=1.0).prop_map(Confidence::new)
    }

    /// Timestamps within 2024.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..366 * 24 * 3600).prop_map(|offset| {
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .map(|start| start + chrono::TimeDelta::seconds(offset))
                .unwrap_or_default()
        })
    }

    pub fn arb_handle() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,14}"
    }

    /// Items drawn from a small id space so that duplicates, replies to
    /// missing parents and cycles all occur.
    pub fn arb_content_item() -> impl Strategy<Value = ContentItem> {
        (
            0u16..64,
            prop::option::of(0u8..8),
            prop::option::of(0u16..80),
            arb_timestamp(),
            0u64..3,
        )
            .prop_map(|(id, author, parent, created_at, favorites)| {
                let mut item = ContentItem::new(id.to_string(), "text", created_at)
                    .with_engagement(favorites, 0);
                item.author_id = author.map(|a| format!("author-{}", a));
                item.parent_id = parent.map(|p| p.to_string());
                item
            })
    }

    pub fn arb_liked_item() -> impl Strategy<Value = LikedItem> {
        (
            0u16..64,
            prop::option::of(arb_handle()),
            prop::option::of(arb_timestamp()),
        )
            .prop_map(|(id, handle, liked_at)| {
                let mut like = LikedItem::new(format!("like-{}", id));
                like.liked_at = liked_at;
                if let Some(handle) = handle {
                    like.text = Some(format!("RT @{}: hello", handle));
                }
                like
            })
    }

    pub fn arb_archive_rows() -> impl Strategy<Value = ArchiveRows> {
        (
            prop::collection::vec(arb_content_item(), 0..80),
            prop::collection::vec(arb_liked_item(), 0..40),
            prop::collection::vec("[0-9]{1,3}", 0..5),
        )
            .prop_map(|(items, likes, blocked)| ArchiveRows {
                items,
                likes,
                blocked,
                ..Default::default()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built archives and stores for common scenarios.

    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use wren_core::SharedClock;
    use wren_storage::{InMemoryTtlStore, Snapshot};

    pub const ACCOUNT_ID: &str = "1000";
    pub const ACCOUNT_USERNAME: &str = "owner";

    /// Fixed reference time for deterministic fixtures.
    pub fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_default()
    }

    pub fn manual_clock() -> ManualClock {
        ManualClock::new(fixed_time())
    }

    /// A small archive:
    /// - own items `1` (root), `2` (reply to `1`), `3` (reply to a missing item)
    /// - likes with a repost marker (`50`), a quotation (`51`), plain text
    ///   (`52`), a self reference (`53`) and one already attributed (`54`)
    pub fn sample_rows() -> ArchiveRows {
        let at = |minutes: i64| fixed_time() - chrono::TimeDelta::minutes(minutes);

        let mut attributed = LikedItem::new("54").with_text("known").with_liked_at(at(1));
        attributed.author_username = Some("bob".to_string());
        attributed.author_id = Some("7".to_string());

        ArchiveRows {
            items: vec![
                ContentItem::new("1", "root post", at(30))
                    .with_author(ACCOUNT_ID)
                    .with_engagement(3, 1),
                ContentItem::new("2", "a reply", at(20))
                    .with_author(ACCOUNT_ID)
                    .with_parent("1"),
                ContentItem::new("3", "reply to a deleted post", at(10))
                    .with_author(ACCOUNT_ID)
                    .with_parent("999"),
            ],
            likes: vec![
                LikedItem::new("50").with_text("RT @alice: hi").with_liked_at(at(5)),
                LikedItem::new("51")
                    .with_text("\"Ship it\" - @carol")
                    .with_liked_at(at(4)),
                LikedItem::new("52").with_text("no author here").with_liked_at(at(3)),
                LikedItem::new("53").with_text("my name is Jane Doe").with_liked_at(at(2)),
                attributed,
            ],
            users: vec![wren_core::UserRecord {
                id: "7".to_string(),
                username: "bob".to_string(),
                display_name: Some("Bob".to_string()),
                profile_url: None,
            }],
            blocked: vec!["666".to_string()],
            muted: vec!["777".to_string()],
            account: Some(AccountRecord {
                account_id: ACCOUNT_ID.to_string(),
                username: ACCOUNT_USERNAME.to_string(),
                display_name: Some("Owner".to_string()),
            }),
        }
    }

    pub fn memory_store(clock: SharedClock) -> Arc<InMemoryTtlStore> {
        Arc::new(InMemoryTtlStore::new(PartitionPolicies::default(), clock))
    }

    /// A loaded snapshot over `rows`, with its backing archive.
    pub fn loaded_snapshot(rows: ArchiveRows) -> (Arc<Snapshot>, Arc<MemoryArchive>) {
        let archive = Arc::new(MemoryArchive::new(rows));
        let snapshot = Snapshot::new(archive.clone(), Arc::new(manual_clock()));
        (load(snapshot), archive)
    }

    /// Like [`loaded_snapshot`], replaying committed attributions from
    /// `store` on every load.
    pub fn loaded_snapshot_with_store(
        rows: ArchiveRows,
        store: Arc<dyn TtlStore>,
    ) -> (Arc<Snapshot>, Arc<MemoryArchive>) {
        let archive = Arc::new(MemoryArchive::new(rows));
        let snapshot =
            Snapshot::new(archive.clone(), Arc::new(manual_clock())).with_attribution_store(store);
        (load(snapshot), archive)
    }

    fn load(snapshot: Snapshot) -> Arc<Snapshot> {
        if let Err(e) = snapshot.load_all() {
            panic!("fixture snapshot failed to load: {}", e);
        }
        Arc::new(snapshot)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_scripted_lookup_counts_calls() {
        let lookup = ScriptedAuthorLookup::new("remote").with_author("1", RemoteAuthor::new("alice"));
        let found = lookup
            .lookup(&["1".to_string(), "2".to_string()])
            .await
            .expect("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(lookup.calls(), 1);

        lookup.set_error(Some(LookupError::Unauthorized {
            backend: "remote".to_string(),
        }));
        assert!(lookup.lookup(&["1".to_string()]).await.is_err());
        lookup.clear_error();
        assert!(lookup.lookup(&["1".to_string()]).await.is_ok());
        assert_eq!(lookup.requested_ids().len(), 3);
    }

    #[test]
    fn test_failing_store_modes() {
        let store = FailingStore::failing_writes();
        assert_eq!(store.get(Partition::Item, "1").expect("read"), None);
        assert!(store.set(Partition::Item, "1", vec![1]).is_err());
        assert_eq!(store.writes_attempted(), 1);
        assert!(FailingStore::new().get(Partition::Item, "1").is_err());
    }

    #[test]
    fn test_sample_snapshot_loads() {
        let (snapshot, archive) = fixtures::loaded_snapshot(fixtures::sample_rows());
        let stats = snapshot.stats().expect("stats");
        assert_eq!(stats.items, 3);
        assert_eq!(stats.likes, 5);
        assert_eq!(archive.load_count(), 1);
        assert_eq!(snapshot.unattributed_likes(10).expect("read").len(), 4);
    }

    proptest! {
        #[test]
        fn prop_generated_rows_load(rows in generators::arb_archive_rows()) {
            let (snapshot, _) = fixtures::loaded_snapshot(rows);
            prop_assert!(snapshot.is_loaded());
        }
    }
}
