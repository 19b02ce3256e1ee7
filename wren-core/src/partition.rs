//! Store partitions and their TTL policies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// A named subdivision of the durable store, one per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Archived content items (posts).
    Item,
    /// User profiles.
    User,
    /// Like engagement records.
    Like,
    /// Bookmark engagement records.
    Bookmark,
    /// Reply records.
    Reply,
    /// Media and other reference data.
    Media,
    /// Author attributions learned by the resolver.
    Attribution,
}

impl Partition {
    /// Every partition, in on-disk creation order.
    pub const ALL: [Partition; 7] = [
        Partition::Item,
        Partition::User,
        Partition::Like,
        Partition::Bookmark,
        Partition::Reply,
        Partition::Media,
        Partition::Attribution,
    ];

    /// Stable lowercase name, also used as the database name on disk.
    pub fn name(&self) -> &'static str {
        match self {
            Partition::Item => "item",
            Partition::User => "user",
            Partition::Like => "like",
            Partition::Bookmark => "bookmark",
            Partition::Reply => "reply",
            Partition::Media => "media",
            Partition::Attribution => "attribution",
        }
    }

    /// Default time-to-live for entries in this partition.
    pub fn default_ttl(&self) -> Duration {
        let secs = match self {
            Partition::Item | Partition::User | Partition::Reply => DAY,
            Partition::Like | Partition::Bookmark => HOUR,
            Partition::Media => 7 * DAY,
            Partition::Attribution => 30 * DAY,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Partition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Partition::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "partition".to_string(),
                value: s.to_string(),
                reason: "unknown partition".to_string(),
            })
    }
}

/// TTL override for a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPolicy {
    pub partition: Partition,
    pub ttl: Duration,
}

impl PartitionPolicy {
    pub fn new(partition: Partition, ttl: Duration) -> Self {
        Self { partition, ttl }
    }
}

/// The full, immutable TTL table a store is constructed with.
///
/// Every partition has a policy; partitions without an override keep their
/// default TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPolicies {
    ttls: BTreeMap<Partition, TimeDelta>,
}

impl PartitionPolicies {
    /// Build the table from overrides, rejecting zero or out-of-range TTLs.
    pub fn new<I>(overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = PartitionPolicy>,
    {
        let mut ttls = BTreeMap::new();
        for partition in Partition::ALL {
            ttls.insert(partition, to_delta(partition, partition.default_ttl())?);
        }
        for policy in overrides {
            ttls.insert(policy.partition, to_delta(policy.partition, policy.ttl)?);
        }
        Ok(Self { ttls })
    }

    /// TTL for a partition.
    pub fn ttl(&self, partition: Partition) -> TimeDelta {
        self.ttls
            .get(&partition)
            .copied()
            .unwrap_or_else(|| TimeDelta::seconds(partition.default_ttl().as_secs() as i64))
    }

    /// Expiry instant for an entry written at `now`.
    pub fn expires_at(&self, partition: Partition, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl(partition))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Partition, TimeDelta)> + '_ {
        self.ttls.iter().map(|(p, ttl)| (*p, *ttl))
    }
}

impl Default for PartitionPolicies {
    fn default() -> Self {
        let ttls = Partition::ALL
            .iter()
            .map(|p| (*p, TimeDelta::seconds(p.default_ttl().as_secs() as i64)))
            .collect();
        Self { ttls }
    }
}

fn to_delta(partition: Partition, ttl: Duration) -> Result<TimeDelta, ConfigError> {
    if ttl.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: format!("ttl.{}", partition),
            value: "0".to_string(),
            reason: "ttl must be positive".to_string(),
        });
    }
    TimeDelta::from_std(ttl).map_err(|e| ConfigError::InvalidValue {
        field: format!("ttl.{}", partition),
        value: format!("{:?}", ttl),
        reason: e.to_string(),
    })
}
