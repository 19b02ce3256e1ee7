//! In-process TTL store.
//!
//! Same contract as the LMDB backend without the durability. Entries live in
//! a sharded `DashMap`, so writers only hold the shard of the key they touch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use wren_core::{Partition, PartitionPolicies, SharedClock, StoreError};

use super::entry::EntryHeader;
use super::traits::{CacheEntry, StatCounters, StoreStats, TtlStore};

#[derive(Debug, Clone)]
struct StoredEntry {
    header: EntryHeader,
    payload: Vec<u8>,
}

/// Memory-backed [`TtlStore`].
#[derive(Debug)]
pub struct InMemoryTtlStore {
    entries: DashMap<(Partition, String), StoredEntry>,
    policies: PartitionPolicies,
    clock: SharedClock,
    stats: BTreeMap<Partition, StatCounters>,
}

impl InMemoryTtlStore {
    pub fn new(policies: PartitionPolicies, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            policies,
            clock,
            stats: Partition::ALL
                .iter()
                .map(|p| (*p, StatCounters::default()))
                .collect(),
        }
    }

    /// Number of physically present entries, expired ones included.
    pub fn physical_len(&self, partition: Partition) -> usize {
        self.entries.iter().filter(|e| e.key().0 == partition).count()
    }

    fn write(&self, partition: Partition, key: String, payload: Vec<u8>, now: DateTime<Utc>) {
        let expires_at = self.policies.expires_at(partition, now);
        match self.entries.entry((partition, key)) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                let created_at = if stored.header.is_live(now) {
                    stored.header.created_at
                } else {
                    now
                };
                stored.header = EntryHeader {
                    created_at,
                    updated_at: now,
                    expires_at,
                };
                stored.payload = payload;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry {
                    header: EntryHeader {
                        created_at: now,
                        updated_at: now,
                        expires_at,
                    },
                    payload,
                });
            }
        }
    }
}

impl TtlStore for InMemoryTtlStore {
    fn get_entry(&self, partition: Partition, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let counters = self.stats.get(&partition);
        let stored = match self.entries.get(&(partition, key.to_string())) {
            Some(stored) => stored.value().clone(),
            None => {
                if let Some(c) = counters {
                    c.miss();
                }
                return Ok(None);
            }
        };

        if !stored.header.is_live(self.clock.now()) {
            if let Some(c) = counters {
                c.expired();
            }
            return Ok(None);
        }

        if let Some(c) = counters {
            c.hit();
        }
        Ok(Some(CacheEntry {
            partition,
            key: key.to_string(),
            payload: stored.payload,
            created_at: stored.header.created_at,
            updated_at: stored.header.updated_at,
            expires_at: stored.header.expires_at,
        }))
    }

    fn set(&self, partition: Partition, key: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        self.write(partition, key.to_string(), payload, self.clock.now());
        if let Some(c) = self.stats.get(&partition) {
            c.wrote(1);
        }
        Ok(())
    }

    fn set_many(
        &self,
        partition: Partition,
        entries: Vec<(String, Vec<u8>)>,
    ) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let count = entries.len();
        for (key, payload) in entries {
            self.write(partition, key, payload, now);
        }
        if let Some(c) = self.stats.get(&partition) {
            c.wrote(count as u64);
        }
        Ok(count)
    }

    fn evict(&self, partition: Partition, key: &str) -> Result<bool, StoreError> {
        let removed = self.entries.remove(&(partition, key.to_string())).is_some();
        if removed {
            if let Some(c) = self.stats.get(&partition) {
                c.evicted();
            }
        }
        Ok(removed)
    }

    fn live_entries(&self, partition: Partition) -> Result<Vec<CacheEntry>, StoreError> {
        let now = self.clock.now();
        let mut entries: Vec<CacheEntry> = self
            .entries
            .iter()
            .filter(|stored| stored.key().0 == partition && stored.header.is_live(now))
            .map(|stored| CacheEntry {
                partition,
                key: stored.key().1.clone(),
                payload: stored.payload.clone(),
                created_at: stored.header.created_at,
                updated_at: stored.header.updated_at,
                expires_at: stored.header.expires_at,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    fn sweep(&self, partition: Partition) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut deleted = 0usize;
        self.entries.retain(|(p, _), stored| {
            let keep = *p != partition || stored.header.is_live(now);
            if !keep {
                deleted += 1;
            }
            keep
        });
        if let Some(c) = self.stats.get(&partition) {
            c.swept(deleted as u64);
        }
        Ok(deleted)
    }

    fn stats(&self, partition: Partition) -> StoreStats {
        self.stats
            .get(&partition)
            .map(StatCounters::snapshot)
            .unwrap_or_default()
    }

    fn policies(&self) -> &PartitionPolicies {
        &self.policies
    }
}
