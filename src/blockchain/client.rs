//! Ledger node client with timeout and failover handling.
//!
//! # Responsibilities
//! - Connect to one primary and any number of failover JSON-RPC endpoints
//! - Answer the collaborator capabilities (balances, receipts, logs)
//! - Turn every transport problem into a typed `NodeError`
//! - Provide a polling log stream for nodes without push subscriptions

use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{
    BlockBound, LedgerNode, LogFilter, LogRecord, LogSource, LogStream, NodeConfig, NodeError,
    NodeResult, Receipt, ReceiptSource,
};
use crate::observability::metrics;

/// JSON-RPC client wrapper with failover support.
#[derive(Clone)]
pub struct BlockchainClient {
    /// List of providers (primary + failovers).
    providers: Vec<Arc<dyn Provider + Send + Sync>>,
    /// Configuration.
    config: NodeConfig,
    /// Request timeout duration.
    timeout_duration: Duration,
}

impl BlockchainClient {
    /// Create a new client.
    ///
    /// Fails only on an unparseable primary URL; an unreachable node is
    /// reported through the first call instead.
    pub async fn new(config: NodeConfig) -> NodeResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            NodeError::NotAvailable(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as Arc<dyn Provider + Send + Sync>);

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let client = Self {
            providers,
            config: config.clone(),
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %config.rpc_url,
                    chain_id = config.chain_id,
                    "Ledger client initialized"
                );
            }
            Err(e) => {
                // Degrade instead of failing: callers go through retries anyway.
                tracing::warn!(
                    error = %e,
                    "Ledger client initialized but chain verification failed"
                );
            }
        }

        Ok(client)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> NodeResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id != self.config.chain_id {
            return Err(NodeError::InvalidResponse(format!(
                "Chain ID mismatch: expected {}, got {}",
                self.config.chain_id, chain_id
            )));
        }
        Ok(())
    }

    /// Get the chain ID from the RPC.
    pub async fn get_chain_id(&self) -> NodeResult<u64> {
        self.with_failover("get chain id", |p| async move { p.get_chain_id().await })
            .await
    }

    /// Check if the node is reachable.
    pub async fn is_healthy(&self) -> bool {
        let healthy = self.block_number().await.is_ok();
        metrics::record_node_health(&self.config.rpc_url, healthy);
        healthy
    }

    /// Get the configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Run `call` against each provider in order until one answers in time.
    async fn with_failover<T, E, F, Fut>(&self, what: &str, call: F) -> NodeResult<T>
    where
        F: Fn(Arc<dyn Provider + Send + Sync>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last = NodeError::NotAvailable("no providers configured".to_string());
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider");
                    last = NodeError::Rpc(format!("All providers failed to {}: {}", what, e));
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, "RPC timeout, trying next provider");
                    last = NodeError::Timeout(self.config.rpc_timeout_secs);
                }
            }
        }
        Err(last)
    }
}

#[async_trait]
impl LedgerNode for BlockchainClient {
    async fn balance(&self, address: Address) -> NodeResult<U256> {
        self.with_failover("get balance", move |p| async move { p.get_balance(address).await })
            .await
    }

    async fn gas_price(&self) -> NodeResult<u128> {
        self.with_failover("get gas price", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn block_number(&self) -> NodeResult<u64> {
        self.with_failover("get block number", |p| async move { p.get_block_number().await })
            .await
    }
}

#[async_trait]
impl ReceiptSource for BlockchainClient {
    async fn fetch_receipt(&self, handle: TxHash) -> NodeResult<Option<Receipt>> {
        let receipt = self
            .with_failover("get receipt", move |p| async move {
                p.get_transaction_receipt(handle).await
            })
            .await?;

        match receipt {
            None => Ok(None),
            Some(r) => {
                let block_number = r.block_number.ok_or_else(|| {
                    NodeError::InvalidResponse(format!("receipt for {} has no block number", handle))
                })?;
                Ok(Some(Receipt {
                    success: r.status(),
                    block_number,
                }))
            }
        }
    }
}

#[async_trait]
impl LogSource for BlockchainClient {
    async fn query_logs(&self, filter: &LogFilter) -> NodeResult<Vec<LogRecord>> {
        let rpc_filter = to_rpc_filter(filter);
        let logs = self
            .with_failover("get logs", |p| {
                let f = rpc_filter.clone();
                async move { p.get_logs(&f).await }
            })
            .await?;
        Ok(logs.into_iter().map(to_log_record).collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> NodeResult<LogStream> {
        // HTTP endpoints cannot push, so follow the chain head instead.
        let head = self.block_number().await?;
        let poller = LogPoller {
            client: self.clone(),
            filter: filter.clone(),
            next_block: head + 1,
            buffered: VecDeque::new(),
            poll_interval: Duration::from_millis(self.config.log_poll_interval_ms),
        };

        let stream = futures_util::stream::unfold(poller, |mut poller| async move {
            loop {
                if let Some(log) = poller.buffered.pop_front() {
                    return Some((Ok(log), poller));
                }
                tokio::time::sleep(poller.poll_interval).await;
                if let Err(e) = poller.poll_once().await {
                    return Some((Err(e), poller));
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// State of a head-following log stream.
struct LogPoller {
    client: BlockchainClient,
    filter: LogFilter,
    next_block: u64,
    buffered: VecDeque<LogRecord>,
    poll_interval: Duration,
}

impl LogPoller {
    async fn poll_once(&mut self) -> NodeResult<()> {
        let head = self.client.block_number().await?;
        if head < self.next_block {
            return Ok(());
        }

        let range = LogFilter::range(self.filter.address, self.filter.signature, self.next_block, head);
        let logs = self.client.query_logs(&range).await?;
        self.buffered.extend(logs);
        self.next_block = head + 1;
        Ok(())
    }
}

fn to_rpc_filter(filter: &LogFilter) -> Filter {
    let mut rpc = Filter::new().address(filter.address);
    rpc = match filter.from_block {
        BlockBound::Number(n) => rpc.from_block(n),
        BlockBound::Latest => rpc.from_block(alloy::eips::BlockNumberOrTag::Latest),
    };
    rpc = match filter.to_block {
        BlockBound::Number(n) => rpc.to_block(n),
        BlockBound::Latest => rpc.to_block(alloy::eips::BlockNumberOrTag::Latest),
    };
    if let Some(signature) = filter.signature {
        rpc = rpc.event_signature(signature);
    }
    rpc
}

fn to_log_record(log: Log) -> LogRecord {
    LogRecord {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    }
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}
