//! Credential validation cache.
//!
//! Remembers whether a credential set last validated successfully, so a
//! process can skip the remote "am I still authorized" round trip on start.
//! Keys are SHA-256 digests; the raw credential never reaches this module's
//! storage, and [`CredentialHash`] can only be built by hashing or from an
//! existing digest.
//!
//! Records have no TTL. Callers invalidate a record when they observe an
//! authorization failure.

use std::fmt;

use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use wren_core::{SharedClock, StoreError};

use crate::cache::lmdb_backend::{open_database, txn_error};

const TABLE: &str = "credential_validation";

/// Which credential family a hash belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// Per-user OAuth credentials (key, secret, token, token secret).
    UserAuth,
    /// Application bearer token.
    AppAuth,
}

impl AuthKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuthKind::UserAuth => "user_auth",
            AuthKind::AppAuth => "app_auth",
        }
    }
}

/// Outcome of the last validation for a credential hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Success,
    Failure,
}

/// SHA-256 digest of a credential set, hex encoded.
///
/// # Invariant
///
/// The inner string is always 64 lowercase hex characters. There is no
/// constructor that accepts a plaintext credential without hashing it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialHash(String);

impl CredentialHash {
    /// Hash the four user-auth values joined by `:`.
    pub fn user_credentials(
        api_key: &str,
        api_secret: &str,
        access_token: &str,
        access_token_secret: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        hasher.update(b":");
        hasher.update(api_secret.as_bytes());
        hasher.update(b":");
        hasher.update(access_token.as_bytes());
        hasher.update(b":");
        hasher.update(access_token_secret.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash an application bearer token.
    pub fn bearer_token(token: &str) -> Self {
        Self(hex::encode(Sha256::digest(token.as_bytes())))
    }

    /// Accept a digest computed elsewhere. Anything that is not a 64
    /// character hex string is rejected.
    pub fn from_hex(digest: &str) -> Option<Self> {
        let valid = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(digest.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialHash({}..)", &self.0[..12])
    }
}

/// One cached validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialValidationRecord {
    pub status: ValidationStatus,
    pub recorded_at: DateTime<Utc>,
}

/// LMDB-backed credential validation cache.
pub struct CredentialCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    clock: SharedClock,
}

impl CredentialCache {
    /// Open the cache's database inside a shared environment.
    pub fn new(env: Env, clock: SharedClock) -> Result<Self, StoreError> {
        let db = open_database(&env, TABLE)?;
        Ok(Self { env, db, clock })
    }

    fn key(kind: AuthKind, hash: &CredentialHash) -> String {
        format!("{}:{}", kind.name(), hash.as_str())
    }

    /// Latest recorded outcome, if any.
    pub fn status(
        &self,
        kind: AuthKind,
        hash: &CredentialHash,
    ) -> Result<Option<ValidationStatus>, StoreError> {
        Ok(self.record_for(kind, hash)?.map(|r| r.status))
    }

    /// Latest record with its timestamp.
    pub fn record_for(
        &self,
        kind: AuthKind,
        hash: &CredentialHash,
    ) -> Result<Option<CredentialValidationRecord>, StoreError> {
        let key = Self::key(kind, hash);
        let rtxn = self.env.read_txn().map_err(|e| txn_error(TABLE, e))?;
        match self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| txn_error(TABLE, e))?
        {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    table: TABLE.to_string(),
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Record (or overwrite) the outcome of a validation.
    pub fn record(
        &self,
        kind: AuthKind,
        hash: &CredentialHash,
        status: ValidationStatus,
    ) -> Result<(), StoreError> {
        let key = Self::key(kind, hash);
        let record = CredentialValidationRecord {
            status,
            recorded_at: self.clock.now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| StoreError::Serialization {
            table: TABLE.to_string(),
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let mut wtxn = self.env.write_txn().map_err(|e| txn_error(TABLE, e))?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(|e| txn_error(TABLE, e))?;
        wtxn.commit().map_err(|e| txn_error(TABLE, e))?;

        tracing::debug!(kind = kind.name(), ?status, "Credential validation recorded");
        Ok(())
    }

    /// Forget a record, e.g. after the remote side rejected the credential.
    pub fn invalidate(&self, kind: AuthKind, hash: &CredentialHash) -> Result<bool, StoreError> {
        let key = Self::key(kind, hash);
        let mut wtxn = self.env.write_txn().map_err(|e| txn_error(TABLE, e))?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| txn_error(TABLE, e))?;
        wtxn.commit().map_err(|e| txn_error(TABLE, e))?;
        Ok(deleted)
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache").finish_non_exhaustive()
    }
}
