//! TTL store trait and entry metadata.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use wren_core::{Partition, PartitionPolicies, StoreError};

/// A stored entry with its lifetime metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub partition: Partition,
    pub key: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is live strictly before its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Durable key-value store partitioned by entity type, each partition with
/// its own TTL.
///
/// # Contract
///
/// - `get` and `get_entry` return `Ok(None)` for a missing key and for an
///   entry whose `expires_at <= now`, whether or not it was swept yet.
/// - `set` computes `expires_at` from the partition's TTL and overwrites any
///   existing entry (last writer wins).
/// - `Err(StoreError)` always means the store failed, never a miss.
/// - Operations on different keys never block each other's reads.
pub trait TtlStore: Send + Sync {
    /// Read a live entry with its metadata.
    fn get_entry(&self, partition: Partition, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Read a live payload.
    fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get_entry(partition, key)?.map(|entry| entry.payload))
    }

    /// Every live entry in the partition, in key order where the backend
    /// has one.
    fn live_entries(&self, partition: Partition) -> Result<Vec<CacheEntry>, StoreError>;

    /// Write or overwrite one entry.
    fn set(&self, partition: Partition, key: &str, payload: Vec<u8>) -> Result<(), StoreError>;

    /// Write many entries with the same semantics as `set`, in one commit.
    ///
    /// Returns the number of entries written.
    fn set_many(
        &self,
        partition: Partition,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<usize, StoreError>;

    /// Remove one entry. Returns whether anything was physically removed.
    fn evict(&self, partition: Partition, key: &str) -> Result<bool, StoreError>;

    /// Physically delete every expired entry in the partition.
    ///
    /// Returns the number of entries deleted. Calling it is never required
    /// for correctness.
    fn sweep(&self, partition: Partition) -> Result<usize, StoreError>;

    /// Counters for one partition since the store was opened.
    fn stats(&self, partition: Partition) -> StoreStats;

    /// The TTL table the store was constructed with.
    fn policies(&self) -> &PartitionPolicies;
}

/// Typed JSON helpers over the opaque payload API.
pub trait TtlStoreExt: TtlStore {
    /// Read and decode a live JSON payload. A payload that does not decode is
    /// reported as corrupt rather than as a miss.
    fn get_json<T: DeserializeOwned>(
        &self,
        partition: Partition,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(partition, key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    table: partition.to_string(),
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(
        &self,
        partition: Partition,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
            table: partition.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.set(partition, key, bytes)
    }
}

impl<S: TtlStore + ?Sized> TtlStoreExt for S {}

// ============================================================================
// STATISTICS
// ============================================================================

/// Per-partition store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads that found a physically present but expired entry.
    pub expired: u64,
    pub writes: u64,
    pub evictions: u64,
    pub swept: u64,
}

impl StoreStats {
    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters backing [`StoreStats`].
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    swept: AtomicU64,
}

impl StatCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// An expired read counts as a miss too.
    pub(crate) fn expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
        self.miss();
    }

    pub(crate) fn wrote(&self, n: u64) {
        self.writes.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn swept(&self, n: u64) {
        self.swept.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = StoreStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(StoreStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_expired_read_counts_as_miss() {
        let counters = StatCounters::default();
        counters.hit();
        counters.expired();
        let stats = counters.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }
}
