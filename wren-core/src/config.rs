//! Configuration types
//!
//! Every section has defaults, can be read from `WREN_*` environment
//! variables, and can be parsed from TOML:
//!
//! ```toml
//! [store]
//! path = "/var/lib/wren"
//! sweep_interval_secs = 300
//!
//! [store.ttl_overrides]
//! like = 1800
//!
//! [resolver]
//! remote_capacity = 300
//! remote_window_secs = 900
//! budget_policy = { mode = "wait", max_wait_secs = 30 }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Partition, PartitionPolicies, PartitionPolicy, TelemetryConfig};

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// Maximum map size in megabytes.
    pub max_size_mb: usize,
    /// Interval between background expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Per-partition TTL overrides in seconds.
    pub ttl_overrides: BTreeMap<Partition, u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/wren-cache"),
            max_size_mb: 256,
            sweep_interval_secs: 600,
            ttl_overrides: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Read store settings from the environment.
    ///
    /// Environment variables:
    /// - `WREN_STORE_PATH`: LMDB directory (default: data/wren-cache)
    /// - `WREN_STORE_MAX_SIZE_MB`: map size (default: 256)
    /// - `WREN_SWEEP_INTERVAL_SECS`: sweep interval (default: 600)
    /// - `WREN_TTL_<PARTITION>_SECS`: TTL override, e.g. `WREN_TTL_LIKE_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ttl_overrides = Partition::ALL
            .iter()
            .filter_map(|p| {
                let key = format!("WREN_TTL_{}_SECS", p.name().to_uppercase());
                std::env::var(key)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(|secs| (*p, secs))
            })
            .collect();

        Self {
            path: std::env::var("WREN_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size_mb: env_or("WREN_STORE_MAX_SIZE_MB", defaults.max_size_mb),
            sweep_interval_secs: env_or("WREN_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            ttl_overrides,
        }
    }

    /// Build the immutable TTL table for store construction.
    pub fn policies(&self) -> Result<PartitionPolicies, ConfigError> {
        PartitionPolicies::new(
            self.ttl_overrides
                .iter()
                .map(|(p, secs)| PartitionPolicy::new(*p, Duration::from_secs(*secs))),
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ============================================================================
// RESOLVER CONFIGURATION
// ============================================================================

/// What the pipeline does when a strategy's budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Skip the strategy for this call.
    #[default]
    Skip,
    /// Wait up to `max_wait_secs` for a permit, then skip.
    Wait { max_wait_secs: u64 },
}

/// Author resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Remote calls allowed per window.
    pub remote_capacity: u32,
    pub remote_window_secs: u64,
    pub remote_timeout_secs: u64,
    /// Maximum ids per remote call.
    pub remote_batch_size: usize,

    /// Mirror calls allowed per window, shared by all mirrors.
    pub mirror_capacity: u32,
    pub mirror_window_secs: u64,
    pub mirror_timeout_secs: u64,
    /// Fixed confidence assigned to a mirror hit.
    pub mirror_confidence: f64,
    pub mirror_min_accept: f64,

    pub text_pattern_min_accept: f64,

    /// Default in-flight limit for batch resolution.
    pub max_concurrent: usize,
    pub budget_policy: BudgetPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            remote_capacity: 300,
            remote_window_secs: 15 * 60,
            remote_timeout_secs: 10,
            remote_batch_size: 100,
            mirror_capacity: 20,
            mirror_window_secs: 60,
            mirror_timeout_secs: 10,
            mirror_confidence: 0.8,
            mirror_min_accept: 0.7,
            text_pattern_min_accept: 0.7,
            max_concurrent: 4,
            budget_policy: BudgetPolicy::Skip,
        }
    }
}

impl ResolverConfig {
    /// Read resolver settings from the environment.
    ///
    /// Environment variables:
    /// - `WREN_REMOTE_CAPACITY`, `WREN_REMOTE_WINDOW_SECS`, `WREN_REMOTE_TIMEOUT_SECS`,
    ///   `WREN_REMOTE_BATCH_SIZE`
    /// - `WREN_MIRROR_CAPACITY`, `WREN_MIRROR_WINDOW_SECS`, `WREN_MIRROR_TIMEOUT_SECS`,
    ///   `WREN_MIRROR_CONFIDENCE`
    /// - `WREN_MAX_CONCURRENT`
    /// - `WREN_BUDGET_WAIT_SECS`: when set, wait this long for budget permits
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let budget_policy = std::env::var("WREN_BUDGET_WAIT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(|max_wait_secs| BudgetPolicy::Wait { max_wait_secs })
            .unwrap_or(defaults.budget_policy);

        Self {
            remote_capacity: env_or("WREN_REMOTE_CAPACITY", defaults.remote_capacity),
            remote_window_secs: env_or("WREN_REMOTE_WINDOW_SECS", defaults.remote_window_secs),
            remote_timeout_secs: env_or("WREN_REMOTE_TIMEOUT_SECS", defaults.remote_timeout_secs),
            remote_batch_size: env_or("WREN_REMOTE_BATCH_SIZE", defaults.remote_batch_size),
            mirror_capacity: env_or("WREN_MIRROR_CAPACITY", defaults.mirror_capacity),
            mirror_window_secs: env_or("WREN_MIRROR_WINDOW_SECS", defaults.mirror_window_secs),
            mirror_timeout_secs: env_or("WREN_MIRROR_TIMEOUT_SECS", defaults.mirror_timeout_secs),
            mirror_confidence: env_or("WREN_MIRROR_CONFIDENCE", defaults.mirror_confidence),
            mirror_min_accept: defaults.mirror_min_accept,
            text_pattern_min_accept: defaults.text_pattern_min_accept,
            max_concurrent: env_or("WREN_MAX_CONCURRENT", defaults.max_concurrent),
            budget_policy,
        }
    }

    pub fn remote_window(&self) -> Duration {
        Duration::from_secs(self.remote_window_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn mirror_window(&self) -> Duration {
        Duration::from_secs(self.mirror_window_secs)
    }

    pub fn mirror_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror_timeout_secs)
    }
}

// ============================================================================
// MASTER CONFIGURATION
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WrenConfig {
    pub store: StoreConfig,
    pub resolver: ResolverConfig,
    pub telemetry: TelemetryConfig,
}

impl WrenConfig {
    /// Load every section from `WREN_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig::from_env(),
            resolver: ResolverConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    /// Parse a TOML document. Missing sections and fields keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Reject values the stores and budgets cannot be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.max_size_mb == 0 {
            return Err(invalid("store.max_size_mb", "0", "must be positive"));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(invalid("store.sweep_interval_secs", "0", "must be positive"));
        }
        self.store.policies()?;

        let r = &self.resolver;
        if r.remote_capacity == 0 {
            return Err(invalid("resolver.remote_capacity", "0", "must be positive"));
        }
        if r.remote_window_secs == 0 {
            return Err(invalid("resolver.remote_window_secs", "0", "must be positive"));
        }
        if r.remote_batch_size == 0 {
            return Err(invalid("resolver.remote_batch_size", "0", "must be positive"));
        }
        if r.mirror_capacity == 0 {
            return Err(invalid("resolver.mirror_capacity", "0", "must be positive"));
        }
        if r.mirror_window_secs == 0 {
            return Err(invalid("resolver.mirror_window_secs", "0", "must be positive"));
        }
        if r.max_concurrent == 0 {
            return Err(invalid("resolver.max_concurrent", "0", "must be positive"));
        }
        for (field, value) in [
            ("resolver.mirror_confidence", r.mirror_confidence),
            ("resolver.mirror_min_accept", r.mirror_min_accept),
            ("resolver.text_pattern_min_accept", r.text_pattern_min_accept),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, &value.to_string(), "must be within [0, 1]"));
            }
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = WrenConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolver.remote_batch_size, 100);
        assert_eq!(config.resolver.budget_policy, BudgetPolicy::Skip);
    }

    #[test]
    fn test_from_env_reads_overrides() {
        let _cap = EnvVarGuard::set("WREN_REMOTE_CAPACITY", Some("42"));
        let _ttl = EnvVarGuard::set("WREN_TTL_LIKE_SECS", Some("120"));
        let _bad = EnvVarGuard::set("WREN_MAX_CONCURRENT", Some("lots"));
        let _wait = EnvVarGuard::set("WREN_BUDGET_WAIT_SECS", Some("5"));

        let config = WrenConfig::from_env();
        assert_eq!(config.resolver.remote_capacity, 42);
        assert_eq!(config.resolver.max_concurrent, 4);
        assert_eq!(
            config.resolver.budget_policy,
            BudgetPolicy::Wait { max_wait_secs: 5 }
        );
        let policies = config.store.policies().expect("valid");
        assert_eq!(policies.ttl(Partition::Like), TimeDelta::seconds(120));
    }

    #[test]
    fn test_from_toml_partial_document() {
        let config = WrenConfig::from_toml_str(
            r#"
            [store]
            sweep_interval_secs = 30

            [store.ttl_overrides]
            item = 1

            [resolver]
            mirror_confidence = 0.75
            budget_policy = { mode = "wait", max_wait_secs = 2 }
            "#,
        )
        .expect("parse");

        assert_eq!(config.store.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.store.max_size_mb, 256);
        assert_eq!(config.resolver.mirror_confidence, 0.75);
        assert_eq!(
            config.resolver.budget_policy,
            BudgetPolicy::Wait { max_wait_secs: 2 }
        );
        let policies = config.store.policies().expect("valid");
        assert_eq!(policies.ttl(Partition::Item), TimeDelta::seconds(1));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = WrenConfig::default();
        config.resolver.remote_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("remote_capacity"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_confidence() {
        let mut config = WrenConfig::default();
        config.resolver.mirror_confidence = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ttl_override() {
        let mut config = WrenConfig::default();
        config.store.ttl_overrides.insert(Partition::Reply, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = WrenConfig::from_toml_str("[store\npath=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
