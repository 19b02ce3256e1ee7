//! LMDB-backed TTL store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! transactional key-value store that survives process restarts.
//!
//! # Layout
//!
//! Each [`Partition`] gets its own named database, so a sweep only walks the
//! partition it cleans. Values carry a fixed header with the entry's
//! lifetime (see `entry.rs`); TTL is checked on every read and is never
//! delegated to the storage engine.
//!
//! # Thread Safety
//!
//! LMDB readers use MVCC snapshots and never block on writers, so a write to
//! one key does not block reads of any other key. Writers are serialized by
//! LMDB itself.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use wren_core::{Partition, PartitionPolicies, SharedClock, StoreError};

use super::entry::EntryHeader;
use super::traits::{CacheEntry, StatCounters, StoreStats, TtlStore};

/// Named databases opened next to the partitions (credentials, fetch log).
const AUXILIARY_DATABASES: u32 = 4;

/// Open (or create) the LMDB environment shared by every wren store.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the environment
/// cannot be opened.
pub fn open_environment<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Env, StoreError> {
    std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
        reason: e.to_string(),
    })?;

    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(max_size_mb * 1024 * 1024)
            .max_dbs(Partition::ALL.len() as u32 + AUXILIARY_DATABASES)
            .open(path.as_ref())
    }
    .map_err(|e| StoreError::Open {
        path: path.as_ref().display().to_string(),
        reason: e.to_string(),
    })?;

    tracing::info!(path = %path.as_ref().display(), max_size_mb, "LMDB environment opened");
    Ok(env)
}

/// Create or open one named database inside the environment.
pub(crate) fn open_database(env: &Env, name: &str) -> Result<Database<Bytes, Bytes>, StoreError> {
    let mut wtxn = env.write_txn().map_err(|e| txn_error(name, e))?;
    let db: Database<Bytes, Bytes> = env
        .create_database(&mut wtxn, Some(name))
        .map_err(|e| txn_error(name, e))?;
    wtxn.commit().map_err(|e| txn_error(name, e))?;
    Ok(db)
}

pub(crate) fn txn_error(table: &str, e: heed::Error) -> StoreError {
    StoreError::Transaction {
        table: table.to_string(),
        reason: e.to_string(),
    }
}

/// LMDB-backed [`TtlStore`].
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use wren_core::{Partition, PartitionPolicies, SystemClock};
/// use wren_storage::cache::{LmdbTtlStore, TtlStore};
///
/// let store = LmdbTtlStore::open("/tmp/wren", 64, PartitionPolicies::default(), Arc::new(SystemClock))?;
/// store.set(Partition::Item, "42", br#"{"text":"hello"}"#.to_vec())?;
/// assert!(store.get(Partition::Item, "42")?.is_some());
/// ```
pub struct LmdbTtlStore {
    env: Env,
    databases: BTreeMap<Partition, Database<Bytes, Bytes>>,
    policies: PartitionPolicies,
    clock: SharedClock,
    stats: BTreeMap<Partition, StatCounters>,
}

impl LmdbTtlStore {
    /// Open a store in its own environment at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        policies: PartitionPolicies,
        clock: SharedClock,
    ) -> Result<Self, StoreError> {
        let env = open_environment(path, max_size_mb)?;
        Self::with_env(env, policies, clock)
    }

    /// Open the partition databases inside an existing environment.
    pub fn with_env(
        env: Env,
        policies: PartitionPolicies,
        clock: SharedClock,
    ) -> Result<Self, StoreError> {
        let mut databases = BTreeMap::new();
        let mut stats = BTreeMap::new();
        for partition in Partition::ALL {
            databases.insert(partition, open_database(&env, partition.name())?);
            stats.insert(partition, StatCounters::default());
        }

        Ok(Self {
            env,
            databases,
            policies,
            clock,
            stats,
        })
    }

    /// The underlying environment, for stores that share it.
    pub fn env(&self) -> &Env {
        &self.env
    }

    fn db(&self, partition: Partition) -> Result<Database<Bytes, Bytes>, StoreError> {
        self.databases
            .get(&partition)
            .copied()
            .ok_or_else(|| StoreError::Transaction {
                table: partition.to_string(),
                reason: "partition database not opened".to_string(),
            })
    }

    fn counters(&self, partition: Partition) -> Option<&StatCounters> {
        self.stats.get(&partition)
    }

    /// Header for a write at `now`, keeping the creation time of a live entry.
    fn next_header(
        &self,
        partition: Partition,
        existing: Option<&[u8]>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> EntryHeader {
        let created_at = existing
            .and_then(|bytes| EntryHeader::decode(bytes).ok())
            .filter(|(header, _)| header.is_live(now))
            .map(|(header, _)| header.created_at)
            .unwrap_or(now);

        EntryHeader {
            created_at,
            updated_at: now,
            expires_at: self.policies.expires_at(partition, now),
        }
    }
}

impl TtlStore for LmdbTtlStore {
    fn get_entry(&self, partition: Partition, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let db = self.db(partition)?;
        let table = partition.name();
        let rtxn = self.env.read_txn().map_err(|e| txn_error(table, e))?;

        let bytes = match db.get(&rtxn, key.as_bytes()).map_err(|e| txn_error(table, e))? {
            Some(bytes) => bytes,
            None => {
                if let Some(c) = self.counters(partition) {
                    c.miss();
                }
                return Ok(None);
            }
        };

        let (header, payload) = EntryHeader::decode(bytes).map_err(|reason| StoreError::Corrupt {
            table: table.to_string(),
            key: key.to_string(),
            reason,
        })?;

        if !header.is_live(self.clock.now()) {
            if let Some(c) = self.counters(partition) {
                c.expired();
            }
            return Ok(None);
        }

        if let Some(c) = self.counters(partition) {
            c.hit();
        }
        Ok(Some(CacheEntry {
            partition,
            key: key.to_string(),
            payload: payload.to_vec(),
            created_at: header.created_at,
            updated_at: header.updated_at,
            expires_at: header.expires_at,
        }))
    }

    fn set(&self, partition: Partition, key: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        self.set_many(partition, vec![(key.to_string(), payload)])
            .map(|_| ())
    }

    fn set_many(
        &self,
        partition: Partition,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let db = self.db(partition)?;
        let table = partition.name();
        let now = self.clock.now();

        let mut wtxn = self.env.write_txn().map_err(|e| txn_error(table, e))?;
        for (key, payload) in &entries {
            let header = {
                let existing = db
                    .get(&wtxn, key.as_bytes())
                    .map_err(|e| txn_error(table, e))?;
                self.next_header(partition, existing, now)
            };
            db.put(&mut wtxn, key.as_bytes(), &header.encode_with(payload))
                .map_err(|e| txn_error(table, e))?;
        }
        wtxn.commit().map_err(|e| txn_error(table, e))?;

        if let Some(c) = self.counters(partition) {
            c.wrote(entries.len() as u64);
        }
        Ok(entries.len())
    }

    fn evict(&self, partition: Partition, key: &str) -> Result<bool, StoreError> {
        let db = self.db(partition)?;
        let table = partition.name();

        let mut wtxn = self.env.write_txn().map_err(|e| txn_error(table, e))?;
        let deleted = db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| txn_error(table, e))?;
        wtxn.commit().map_err(|e| txn_error(table, e))?;

        if deleted {
            if let Some(c) = self.counters(partition) {
                c.evicted();
            }
        }
        Ok(deleted)
    }

    fn live_entries(&self, partition: Partition) -> Result<Vec<CacheEntry>, StoreError> {
        let db = self.db(partition)?;
        let table = partition.name();
        let now = self.clock.now();
        let rtxn = self.env.read_txn().map_err(|e| txn_error(table, e))?;

        let mut entries = Vec::new();
        for result in db.iter(&rtxn).map_err(|e| txn_error(table, e))? {
            let (key, value) = result.map_err(|e| txn_error(table, e))?;
            let key = String::from_utf8_lossy(key).into_owned();
            let (header, payload) = EntryHeader::decode(value).map_err(|reason| StoreError::Corrupt {
                table: table.to_string(),
                key: key.clone(),
                reason,
            })?;
            if header.is_live(now) {
                entries.push(CacheEntry {
                    partition,
                    key,
                    payload: payload.to_vec(),
                    created_at: header.created_at,
                    updated_at: header.updated_at,
                    expires_at: header.expires_at,
                });
            }
        }
        Ok(entries)
    }

    fn sweep(&self, partition: Partition) -> Result<usize, StoreError> {
        let db = self.db(partition)?;
        let table = partition.name();
        let now = self.clock.now();

        let mut wtxn = self.env.write_txn().map_err(|e| txn_error(table, e))?;
        let expired: Vec<Vec<u8>> = {
            let iter = db.iter(&wtxn).map_err(|e| txn_error(table, e))?;
            let mut keys = Vec::new();
            for result in iter {
                let (key, value) = result.map_err(|e| txn_error(table, e))?;
                if let Ok((header, _)) = EntryHeader::decode(value) {
                    if !header.is_live(now) {
                        keys.push(key.to_vec());
                    }
                }
            }
            keys
        };

        let mut deleted = 0usize;
        for key in &expired {
            if db.delete(&mut wtxn, key).map_err(|e| txn_error(table, e))? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(|e| txn_error(table, e))?;

        if let Some(c) = self.counters(partition) {
            c.swept(deleted as u64);
        }
        tracing::debug!(partition = table, deleted, "Swept expired entries");
        Ok(deleted)
    }

    fn stats(&self, partition: Partition) -> StoreStats {
        self.counters(partition)
            .map(StatCounters::snapshot)
            .unwrap_or_default()
    }

    fn policies(&self) -> &PartitionPolicies {
        &self.policies
    }
}

impl fmt::Debug for LmdbTtlStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbTtlStore")
            .field("path", &self.env.path())
            .field("partitions", &self.databases.len())
            .field("policies", &self.policies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use wren_core::{ManualClock, PartitionPolicy};

    fn create_test_store() -> (LmdbTtlStore, ManualClock, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let clock = ManualClock::starting_now();
        let policies = PartitionPolicies::new([PartitionPolicy::new(
            Partition::Item,
            Duration::from_secs(1),
        )])
        .expect("valid policies");
        let store = LmdbTtlStore::open(temp_dir.path(), 10, policies, Arc::new(clock.clone()))
            .expect("store creation should succeed");
        (store, clock, temp_dir)
    }

    #[test]
    fn test_fresh_cache_hit() {
        let (store, _clock, _dir) = create_test_store();
        store
            .set(Partition::Item, "42", br#"{"text":"hello"}"#.to_vec())
            .expect("set");
        let payload = store.get(Partition::Item, "42").expect("get");
        assert_eq!(payload.as_deref(), Some(br#"{"text":"hello"}"#.as_slice()));
        assert_eq!(store.stats(Partition::Item).hits, 1);
    }

    #[test]
    fn test_live_entries_skip_expired_and_other_partitions() {
        let (store, clock, _dir) = create_test_store();
        store.set(Partition::Item, "old", b"1".to_vec()).expect("set");
        clock.advance(Duration::from_secs(2));
        store.set(Partition::Item, "new", b"2".to_vec()).expect("set");
        store.set(Partition::User, "7", b"3".to_vec()).expect("set");

        let live = store.live_entries(Partition::Item).expect("scan");
        let keys: Vec<&str> = live.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["new"]);
        assert_eq!(live[0].payload, b"2".to_vec());
    }

    #[test]
    fn test_expired_entry_is_a_miss_before_sweep() {
        let (store, clock, _dir) = create_test_store();
        store.set(Partition::Item, "42", b"{}".to_vec()).expect("set");

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.get(Partition::Item, "42").expect("get"), None);
        assert_eq!(store.stats(Partition::Item).expired, 1);

        // Still physically present until swept.
        assert_eq!(store.sweep(Partition::Item).expect("sweep"), 1);
        assert_eq!(store.sweep(Partition::Item).expect("sweep"), 0);
    }

    #[test]
    fn test_set_twice_refreshes_updated_at_only() {
        let (store, clock, _dir) = create_test_store();
        store.set(Partition::User, "u1", b"same".to_vec()).expect("set");
        let first = store
            .get_entry(Partition::User, "u1")
            .expect("get")
            .expect("present");

        clock.advance(Duration::from_secs(5));
        store.set(Partition::User, "u1", b"same".to_vec()).expect("set");
        let second = store
            .get_entry(Partition::User, "u1")
            .expect("get")
            .expect("present");

        assert_eq!(second.payload, first.payload);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert!(second.expires_at > first.expires_at);
    }

    #[test]
    fn test_overwrite_after_expiry_starts_new_lifetime() {
        let (store, clock, _dir) = create_test_store();
        store.set(Partition::Item, "42", b"old".to_vec()).expect("set");
        let first = store
            .get_entry(Partition::Item, "42")
            .expect("get")
            .expect("present");

        clock.advance(Duration::from_secs(3));
        store.set(Partition::Item, "42", b"new".to_vec()).expect("set");
        let second = store
            .get_entry(Partition::Item, "42")
            .expect("get")
            .expect("present");
        assert!(second.created_at > first.created_at);
        assert_eq!(second.payload, b"new".to_vec());
    }

    #[test]
    fn test_partitions_are_isolated() {
        let (store, _clock, _dir) = create_test_store();
        store.set(Partition::Like, "7", b"like".to_vec()).expect("set");
        assert_eq!(store.get(Partition::Bookmark, "7").expect("get"), None);
        assert!(store.get(Partition::Like, "7").expect("get").is_some());
    }

    #[test]
    fn test_set_many_and_evict() {
        let (store, _clock, _dir) = create_test_store();
        let written = store
            .set_many(
                Partition::User,
                vec![
                    ("a".to_string(), b"1".to_vec()),
                    ("b".to_string(), b"2".to_vec()),
                    ("c".to_string(), b"3".to_vec()),
                ],
            )
            .expect("set_many");
        assert_eq!(written, 3);
        assert_eq!(store.set_many(Partition::User, Vec::new()).expect("empty"), 0);

        assert!(store.evict(Partition::User, "b").expect("evict"));
        assert!(!store.evict(Partition::User, "b").expect("evict again"));
        assert_eq!(store.get(Partition::User, "b").expect("get"), None);
        assert_eq!(store.get(Partition::User, "c").expect("get"), Some(b"3".to_vec()));
        assert_eq!(store.stats(Partition::User).writes, 3);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let clock = ManualClock::starting_now();
        {
            let env = open_environment(temp_dir.path(), 10).expect("env");
            let store = LmdbTtlStore::with_env(
                env,
                PartitionPolicies::default(),
                Arc::new(clock.clone()),
            )
            .expect("store");
            store.set(Partition::Reply, "r1", b"kept".to_vec()).expect("set");
        }

        let reopened = LmdbTtlStore::open(
            temp_dir.path(),
            10,
            PartitionPolicies::default(),
            Arc::new(clock),
        )
        .expect("reopen");
        assert_eq!(
            reopened.get(Partition::Reply, "r1").expect("get"),
            Some(b"kept".to_vec())
        );
    }

    #[test]
    fn test_corrupt_value_is_an_error_not_a_miss() {
        let (store, _clock, _dir) = create_test_store();
        let db = store.db(Partition::Media).expect("db");
        let mut wtxn = store.env.write_txn().expect("txn");
        db.put(&mut wtxn, b"bad", b"short").expect("put");
        wtxn.commit().expect("commit");

        let err = store.get(Partition::Media, "bad").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
