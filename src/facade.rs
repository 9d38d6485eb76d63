//! Cached, retried and metered access to common node queries.
//!
//! Every lookup consults the cache first. On a miss the node is called
//! through the retry executor, each attempt is metered, and a success is
//! written back. Gas price degrades to a configured default when the node
//! stays unreachable.

use alloy::primitives::{Address, U256};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::blockchain::types::{LedgerNode, NodeResult};
use crate::cache::{CacheStats, ChainCache};
use crate::config::FallbackConfig;
use crate::observability::MetricsCollector;
use crate::resilience::{RetryError, RetryExecutor};

const BALANCE: &str = "eth_getBalance";
const GAS_PRICE: &str = "eth_gasPrice";
const BLOCK_NUMBER: &str = "eth_blockNumber";

pub struct ResilientRpcFacade {
    node: Arc<dyn LedgerNode>,
    retry: RetryExecutor,
    cache: ChainCache,
    metrics: Arc<MetricsCollector>,
    fallback: FallbackConfig,
}

impl ResilientRpcFacade {
    pub fn new(
        node: Arc<dyn LedgerNode>,
        retry: RetryExecutor,
        cache: ChainCache,
        metrics: Arc<MetricsCollector>,
        fallback: FallbackConfig,
    ) -> Self {
        Self {
            node,
            retry,
            cache,
            metrics,
            fallback,
        }
    }

    /// Balance of `address` in wei.
    pub async fn get_balance(&self, address: Address) -> Result<U256, RetryError> {
        if let Some(balance) = self.cache.cached_balance(&address) {
            tracing::debug!(%address, "Balance served from cache");
            return Ok(balance);
        }

        let node = self.node.as_ref();
        let metrics = self.metrics.as_ref();
        let balance = self
            .retry
            .execute_with_retry(
                move || async move { metered(metrics, BALANCE, node.balance(address)).await },
                "get_balance",
            )
            .await?;

        self.cache.cache_balance(address, balance);
        Ok(balance)
    }

    /// Current gas price in wei, or the configured default once retries are
    /// exhausted. The default is never cached.
    pub async fn get_gas_price(&self) -> Result<u128, RetryError> {
        if let Some(price) = self.cache.cached_gas_price() {
            tracing::debug!("Gas price served from cache");
            return Ok(price);
        }

        let node = self.node.as_ref();
        let metrics = self.metrics.as_ref();
        let cache = &self.cache;
        let default_price = self.fallback.default_gas_price_wei;
        self.retry
            .execute_with_fallback(
                move || async move {
                    let price = metered(metrics, GAS_PRICE, node.gas_price()).await?;
                    cache.cache_gas_price(price);
                    Ok(price)
                },
                move || async move {
                    tracing::warn!(gas_price = default_price, "Using default gas price");
                    Ok(default_price)
                },
                "get_gas_price",
            )
            .await
    }

    pub async fn get_block_number(&self) -> Result<u64, RetryError> {
        if let Some(block) = self.cache.cached_block_number() {
            tracing::debug!(block, "Block number served from cache");
            return Ok(block);
        }

        let node = self.node.as_ref();
        let metrics = self.metrics.as_ref();
        let block = self
            .retry
            .execute_with_retry(
                move || async move { metered(metrics, BLOCK_NUMBER, node.block_number()).await },
                "get_block_number",
            )
            .await?;

        self.cache.cache_block_number(block);
        Ok(block)
    }

    /// One uncached, unretried probe of the node.
    pub async fn is_connected(&self) -> bool {
        match metered(&self.metrics, BLOCK_NUMBER, self.node.block_number()).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Node connectivity check failed");
                false
            }
        }
    }

    /// Forget cached state for `address`, e.g. after sending it a transaction.
    pub fn invalidate_address(&self, address: &Address) {
        self.cache.invalidate_address(address);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &ChainCache {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }
}

async fn metered<T>(
    metrics: &MetricsCollector,
    endpoint: &str,
    call: impl Future<Output = NodeResult<T>>,
) -> NodeResult<T> {
    let started = Instant::now();
    let result = call.await;
    metrics.record_latency(endpoint, started.elapsed().as_millis() as u64);
    match &result {
        Ok(_) => metrics.record_request(endpoint, true),
        Err(e) => metrics.record_failure(endpoint, e.kind()),
    }
    result
}
