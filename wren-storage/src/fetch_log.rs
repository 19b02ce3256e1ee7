//! Last-fetch watermarks per account and data kind.
//!
//! Incremental fetchers use these to ask only for items newer than the last
//! successful fetch. Watermarks do not expire.

use std::fmt;

use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env};
use wren_core::StoreError;

use crate::cache::lmdb_backend::{open_database, txn_error};

const TABLE: &str = "last_fetch";

/// Kind of data a watermark tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Items,
    Likes,
    Bookmarks,
    Replies,
}

impl FetchKind {
    pub fn name(&self) -> &'static str {
        match self {
            FetchKind::Items => "items",
            FetchKind::Likes => "likes",
            FetchKind::Bookmarks => "bookmarks",
            FetchKind::Replies => "replies",
        }
    }
}

/// LMDB-backed watermark table.
pub struct FetchLog {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl FetchLog {
    pub fn new(env: Env) -> Result<Self, StoreError> {
        let db = open_database(&env, TABLE)?;
        Ok(Self { env, db })
    }

    fn key(account_id: &str, kind: FetchKind) -> String {
        format!("{}:{}", account_id, kind.name())
    }

    pub fn last_fetch(
        &self,
        account_id: &str,
        kind: FetchKind,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let key = Self::key(account_id, kind);
        let rtxn = self.env.read_txn().map_err(|e| txn_error(TABLE, e))?;
        let Some(bytes) = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| txn_error(TABLE, e))?
        else {
            return Ok(None);
        };

        let raw: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Corrupt {
            table: TABLE.to_string(),
            key: key.clone(),
            reason: format!("expected 8 bytes, found {}", bytes.len()),
        })?;
        let millis = i64::from_le_bytes(raw);
        DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt {
                table: TABLE.to_string(),
                key,
                reason: format!("timestamp {} out of range", millis),
            })
    }

    /// Record a successful fetch. Overwrites the previous watermark.
    pub fn record_fetch(
        &self,
        account_id: &str,
        kind: FetchKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = Self::key(account_id, kind);
        let mut wtxn = self.env.write_txn().map_err(|e| txn_error(TABLE, e))?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &at.timestamp_millis().to_le_bytes())
            .map_err(|e| txn_error(TABLE, e))?;
        wtxn.commit().map_err(|e| txn_error(TABLE, e))?;
        Ok(())
    }
}

impl fmt::Debug for FetchLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::open_environment;
    use chrono::TimeDelta;
    use tempfile::TempDir;

    #[test]
    fn test_watermarks_are_per_account_and_kind() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let log = FetchLog::new(open_environment(temp_dir.path(), 10).expect("env")).expect("log");
        let at = DateTime::from_timestamp_millis(1_700_000_000_000).expect("valid");

        assert_eq!(log.last_fetch("acct", FetchKind::Likes).expect("read"), None);
        log.record_fetch("acct", FetchKind::Likes, at).expect("write");
        assert_eq!(log.last_fetch("acct", FetchKind::Likes).expect("read"), Some(at));
        assert_eq!(log.last_fetch("acct", FetchKind::Items).expect("read"), None);
        assert_eq!(log.last_fetch("other", FetchKind::Likes).expect("read"), None);

        let later = at + TimeDelta::hours(1);
        log.record_fetch("acct", FetchKind::Likes, later).expect("write");
        assert_eq!(log.last_fetch("acct", FetchKind::Likes).expect("read"), Some(later));
    }
}
