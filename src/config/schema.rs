//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! resilience layer. All types derive Serde traits for deserialization from
//! config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Ledger node connection settings.
    pub node: NodeConfig,

    /// Retry policy for remote calls.
    pub retry: RetryConfig,

    /// Per-category cache TTLs and janitor period.
    pub cache: CacheConfig,

    /// Transaction monitor settings.
    pub monitor: MonitorConfig,

    /// Contract event listening.
    pub events: EventsConfig,

    /// Values served when the node stays unreachable.
    pub fallback: FallbackConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Ledger node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// How often the live log stream asks the node for new blocks.
    pub log_poll_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
            log_poll_interval_ms: 2000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor applied per further attempt.
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay (0 = uncapped).
    pub max_delay_ms: u64,

    /// Random extra delay as a fraction of the computed delay (0 = none).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 0,
            jitter_ratio: 0.0,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub balance_ttl_secs: u64,
    pub gas_price_ttl_secs: u64,
    pub block_number_ttl_secs: u64,

    /// Period of the expired-entry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            balance_ttl_secs: 300,
            gas_price_ttl_secs: 60,
            block_number_ttl_secs: 10,
            sweep_interval_secs: 60,
        }
    }
}

/// Transaction monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval used when the caller does not pick one.
    pub default_interval_secs: u32,

    /// A task times out once its check count exceeds this.
    pub max_checks: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 3,
            max_checks: 100,
        }
    }
}

/// A contract/event pair to follow live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractEventConfig {
    /// Contract address (0x-prefixed hex).
    pub address: String,

    /// Event signature hash (topic0, 0x-prefixed hex).
    pub signature: String,

    /// Free-form label, e.g. "PlatformToken".
    #[serde(default)]
    pub contract_type: String,
}

/// Event listening configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EventsConfig {
    /// Start live listening on startup.
    pub enabled: bool,

    /// Contracts to listen to.
    pub contracts: Vec<ContractEventConfig>,
}

/// Degraded-mode values.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Gas price returned when the node cannot be reached.
    pub default_gas_price_wei: u128,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            default_gas_price_wei: 20_000_000_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ResilienceConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.cache.balance_ttl_secs, 300);
        assert_eq!(config.cache.gas_price_ttl_secs, 60);
        assert_eq!(config.cache.block_number_ttl_secs, 10);
        assert_eq!(config.monitor.max_checks, 100);
        assert_eq!(config.fallback.default_gas_price_wei, 20_000_000_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ResilienceConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 5

            [[events.contracts]]
            address = "0x0000000000000000000000000000000000000001"
            signature = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.events.contracts.len(), 1);
        assert!(config.events.contracts[0].contract_type.is_empty());
        assert_eq!(config.node.rpc_timeout_secs, 10);
    }
}
