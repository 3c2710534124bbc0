//! Update server configuration — loaded from environment variables.

use crate::cache;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Seconds between auto-assignment sweeps.
    pub auto_assign_interval_secs: u64,
    /// Seconds between rollout handler sweeps.
    pub rollout_interval_secs: u64,
    /// Cache configuration string (`nop`, `none`, or `key=value` options).
    pub cache_spec: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let auto_assign_interval_secs = std::env::var("UPDATE_AUTO_ASSIGN_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let rollout_interval_secs = std::env::var("UPDATE_ROLLOUT_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let cache_spec = std::env::var("UPDATE_CACHE_SPEC")
            .unwrap_or_else(|_| "maximumSize=10000,expireAfterWrite=30".to_string());

        if cache::is_nop(&cache_spec) {
            tracing::warn!("UPDATE_CACHE_SPEC disables caching -- filter match counts will be recomputed on every read");
        }

        Self {
            auto_assign_interval_secs,
            rollout_interval_secs,
            cache_spec,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auto_assign_interval_secs: 5,
            rollout_interval_secs: 5,
            cache_spec: "maximumSize=10000,expireAfterWrite=30".to_string(),
        }
    }
}
