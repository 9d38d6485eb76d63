//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and that every
//! configured address and signature parses. All violations are reported, not
//! just the first.

use alloy::primitives::{Address, B256};
use thiserror::Error;

use crate::config::schema::ResilienceConfig;

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be at least {min}")]
    TooSmall { field: &'static str, min: String },

    #[error("{field} must be in [0, 1), got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("events.contracts[{index}]: invalid {what} '{value}'")]
    InvalidContract {
        index: usize,
        what: &'static str,
        value: String,
    },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.node.rpc_url.parse::<url::Url>().is_err() {
        errors.push(ValidationError::InvalidUrl {
            field: "node.rpc_url",
            value: config.node.rpc_url.clone(),
        });
    }
    if config.node.rpc_timeout_secs == 0 {
        errors.push(too_small("node.rpc_timeout_secs", 1));
    }
    if config.node.log_poll_interval_ms == 0 {
        errors.push(too_small("node.log_poll_interval_ms", 1));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        errors.push(too_small("retry.max_attempts", 1));
    }
    if !(retry.backoff_multiplier >= 1.0) {
        errors.push(ValidationError::TooSmall {
            field: "retry.backoff_multiplier",
            min: "1.0".to_string(),
        });
    }
    if !(0.0..1.0).contains(&retry.jitter_ratio) {
        errors.push(ValidationError::OutOfRange {
            field: "retry.jitter_ratio",
            value: retry.jitter_ratio,
        });
    }

    let cache = &config.cache;
    for (field, value) in [
        ("cache.balance_ttl_secs", cache.balance_ttl_secs),
        ("cache.gas_price_ttl_secs", cache.gas_price_ttl_secs),
        ("cache.block_number_ttl_secs", cache.block_number_ttl_secs),
        ("cache.sweep_interval_secs", cache.sweep_interval_secs),
    ] {
        if value == 0 {
            errors.push(too_small(field, 1));
        }
    }

    if config.monitor.default_interval_secs == 0 {
        errors.push(too_small("monitor.default_interval_secs", 1));
    }
    if config.monitor.max_checks == 0 {
        errors.push(too_small("monitor.max_checks", 1));
    }

    for (index, contract) in config.events.contracts.iter().enumerate() {
        if contract.address.parse::<Address>().is_err() {
            errors.push(ValidationError::InvalidContract {
                index,
                what: "address",
                value: contract.address.clone(),
            });
        }
        if contract.signature.parse::<B256>().is_err() {
            errors.push(ValidationError::InvalidContract {
                index,
                what: "signature",
                value: contract.signature.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn too_small(field: &'static str, min: u64) -> ValidationError {
    ValidationError::TooSmall {
        field,
        min: min.to_string(),
    }
}
