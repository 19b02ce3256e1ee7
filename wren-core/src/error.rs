//! Error types for wren operations

use thiserror::Error;

/// Durable store errors.
///
/// A miss is never an error: `get` returns `Ok(None)` for absent or expired
/// entries. These variants mean the store itself could not be read or
/// written and must not be treated as "no data".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Transaction failed on {table}: {reason}")]
    Transaction { table: String, reason: String },

    #[error("Corrupt entry in {table} for key {key}: {reason}")]
    Corrupt {
        table: String,
        key: String,
        reason: String,
    },

    #[error("Serialization failed for {table}/{key}: {reason}")]
    Serialization {
        table: String,
        key: String,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

/// Errors raised by a relational archive source while producing rows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("Failed to open archive at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Query on {table} failed: {reason}")]
    Query { table: String, reason: String },

    #[error("Invalid row in {table}: {reason}")]
    InvalidRow { table: String, reason: String },

    #[error("Archive unavailable: {reason}")]
    Unavailable { reason: String },
}

/// In-memory snapshot errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// The snapshot is cold: it was never loaded, or its last load failed.
    #[error("Snapshot unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Snapshot load failed: {0}")]
    Load(#[from] ArchiveError),

    /// Committed attributions could not be read back during a load.
    #[error("Snapshot attribution overlay failed: {0}")]
    Overlay(#[from] StoreError),

    #[error("Snapshot lock poisoned")]
    LockPoisoned,
}

/// Errors reported by remote and mirror lookup backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Rate limited by {backend}, retry after {retry_after_ms:?}ms")]
    RateLimited {
        backend: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Unauthorized by {backend}")]
    Unauthorized { backend: String },

    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to initialize telemetry: {reason}")]
    Telemetry { reason: String },
}

/// Author resolution errors.
///
/// Exhaustion and budget exhaustion are outcomes, not errors; only failures
/// that make the cache or snapshot untrustworthy end up here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Store failure during resolution: {0}")]
    Store(#[from] StoreError),

    #[error("Snapshot failure during resolution: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Resolution cancelled after {committed} committed items")]
    Cancelled { committed: usize },

    #[error("No snapshot attached to the resolver")]
    NoSnapshot,
}

/// Master error type for all wren errors.
#[derive(Debug, Clone, Error)]
pub enum WrenError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),
}

/// Result type alias for wren operations.
pub type WrenResult<T> = Result<T, WrenError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_corrupt() {
        let err = StoreError::Corrupt {
            table: "item".to_string(),
            key: "42".to_string(),
            reason: "short header".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Corrupt entry"));
        assert!(msg.contains("item"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_lookup_error_display_rate_limited() {
        let err = LookupError::RateLimited {
            backend: "remote".to_string(),
            retry_after_ms: Some(1500),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Rate limited"));
        assert!(msg.contains("remote"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_snapshot_error_from_archive() {
        let err = SnapshotError::from(ArchiveError::Unavailable {
            reason: "disk gone".to_string(),
        });
        assert!(matches!(err, SnapshotError::Load(_)));
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "remote_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("remote_capacity"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_resolve_error_keeps_store_failure() {
        let err = ResolveError::from(StoreError::LockPoisoned);
        assert_eq!(err, ResolveError::Store(StoreError::LockPoisoned));
    }

    #[test]
    fn test_wren_error_from_variants() {
        let store = WrenError::from(StoreError::Io {
            reason: "eio".to_string(),
        });
        assert!(matches!(store, WrenError::Store(_)));

        let snapshot = WrenError::from(SnapshotError::LockPoisoned);
        assert!(matches!(snapshot, WrenError::Snapshot(_)));

        let lookup = WrenError::from(LookupError::Unauthorized {
            backend: "remote".to_string(),
        });
        assert!(matches!(lookup, WrenError::Lookup(_)));

        let config = WrenError::from(ConfigError::MissingRequired {
            field: "store.path".to_string(),
        });
        assert!(matches!(config, WrenError::Config(_)));

        let resolve = WrenError::from(ResolveError::NoSnapshot);
        assert!(matches!(resolve, WrenError::Resolve(_)));
    }
}
