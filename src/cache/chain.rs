//! Per-category cache for slowly-changing chain state.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::cache::ttl::TtlCache;
use crate::clock::SharedClock;
use crate::config::CacheConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;

/// Entry counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub balances: usize,
    pub gas_price: usize,
    pub block_number: usize,
}

/// Balances, gas price and block height, each with its own TTL.
#[derive(Clone)]
pub struct ChainCache {
    balances: TtlCache<Address, U256>,
    gas_price: TtlCache<(), u128>,
    block_number: TtlCache<(), u64>,
}

impl ChainCache {
    pub fn new(config: &CacheConfig, clock: SharedClock) -> Self {
        Self {
            balances: TtlCache::new(Duration::from_secs(config.balance_ttl_secs), clock.clone()),
            gas_price: TtlCache::new(Duration::from_secs(config.gas_price_ttl_secs), clock.clone()),
            block_number: TtlCache::new(Duration::from_secs(config.block_number_ttl_secs), clock),
        }
    }

    pub fn cache_balance(&self, address: Address, balance: U256) {
        self.balances.put(address, balance);
        tracing::debug!(%address, %balance, "Cached balance");
    }

    pub fn cached_balance(&self, address: &Address) -> Option<U256> {
        self.balances.get(address)
    }

    pub fn cache_gas_price(&self, wei: u128) {
        self.gas_price.put((), wei);
        tracing::debug!(gas_price = wei, "Cached gas price");
    }

    pub fn cached_gas_price(&self) -> Option<u128> {
        self.gas_price.get(&())
    }

    pub fn cache_block_number(&self, block: u64) {
        self.block_number.put((), block);
        tracing::debug!(block, "Cached block number");
    }

    pub fn cached_block_number(&self) -> Option<u64> {
        self.block_number.get(&())
    }

    /// Drop everything cached for `address`.
    pub fn invalidate_address(&self, address: &Address) {
        self.balances.invalidate(address);
        tracing::debug!(%address, "Invalidated address cache");
    }

    pub fn clear_all(&self) {
        self.balances.clear();
        self.gas_price.clear();
        self.block_number.clear();
        tracing::info!("Cleared all chain caches");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            balances: self.balances.len(),
            gas_price: self.gas_price.len(),
            block_number: self.block_number.len(),
        }
    }

    /// Remove expired entries from every category.
    pub fn sweep(&self) -> usize {
        let removed = self.balances.sweep() + self.gas_price.sweep() + self.block_number.sweep();

        let stats = self.stats();
        metrics::record_cache_size("balances", stats.balances);
        metrics::record_cache_size("gas_price", stats.gas_price);
        metrics::record_cache_size("block_number", stats.block_number);

        tracing::debug!(removed, "Swept expired cache entries");
        removed
    }

    /// Start the janitor: sweep every `period` until shutdown.
    pub fn spawn_sweeper(&self, period: Duration, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            tracing::info!(period_secs = period.as_secs(), "Cache sweeper starting");
            let mut ticker = time::interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                    _ = shutdown.wait() => {
                        tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::Shutdown;
    use std::sync::Arc;

    fn cache() -> (ChainCache, ManualClock) {
        let clock = ManualClock::new(0);
        (ChainCache::new(&CacheConfig::default(), Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_categories_expire_independently() {
        let (cache, clock) = cache();
        let user = Address::repeat_byte(0x42);
        cache.cache_balance(user, U256::from(1000));
        cache.cache_gas_price(30_000_000_000);
        cache.cache_block_number(19_000_000);

        clock.advance_millis(11_000);
        assert_eq!(cache.cached_block_number(), None);
        assert_eq!(cache.cached_gas_price(), Some(30_000_000_000));
        assert_eq!(cache.cached_balance(&user), Some(U256::from(1000)));

        clock.advance_millis(50_000);
        assert_eq!(cache.cached_gas_price(), None);
        assert_eq!(cache.cached_balance(&user), Some(U256::from(1000)));

        clock.advance_millis(240_000);
        assert_eq!(cache.cached_balance(&user), None);
    }

    #[test]
    fn test_invalidate_address_and_stats() {
        let (cache, _clock) = cache();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        cache.cache_balance(a, U256::from(1));
        cache.cache_balance(b, U256::from(2));
        cache.cache_gas_price(1);

        cache.invalidate_address(&a);
        assert_eq!(
            cache.stats(),
            CacheStats {
                balances: 1,
                gas_price: 1,
                block_number: 0
            }
        );

        cache.clear_all();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_periodically_and_stops() {
        let (cache, clock) = cache();
        cache.cache_block_number(1);
        cache.cache_gas_price(1);
        clock.advance_millis(20_000);
        assert_eq!(cache.stats().block_number, 1);

        let shutdown = Shutdown::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(60), shutdown.subscribe());

        time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.stats().block_number, 0);
        assert_eq!(cache.stats().gas_price, 1);

        shutdown.trigger();
        handle.await.unwrap();
    }
}
