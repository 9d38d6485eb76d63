//! Collaborator capabilities, chain value types and remote failure definitions.

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export NodeConfig from config module to avoid duplication
pub use crate::config::schema::NodeConfig;

/// Failure raised by a remote ledger call.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Node answered with something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Node not configured or unreachable at startup.
    #[error("Node not available: {0}")]
    NotAvailable(String),
}

impl NodeError {
    /// Whether a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, NodeError::InvalidResponse(_))
    }

    /// Short label used as the error kind in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Rpc(_) => "rpc",
            NodeError::Timeout(_) => "timeout",
            NodeError::InvalidResponse(_) => "invalid_response",
            NodeError::NotAvailable(_) => "not_available",
        }
    }
}

/// Result type for remote ledger calls.
pub type NodeResult<T> = Result<T, NodeError>;

/// Terminal outcome of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Whether execution succeeded.
    pub success: bool,
    /// Block the transaction was included in.
    pub block_number: u64,
}

/// An event record emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub address: Address,
    /// topic0 is the event signature; the rest are indexed arguments.
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

impl LogRecord {
    /// Event signature (topic0), if present.
    pub fn signature(&self) -> Option<B256> {
        self.topics.first().copied()
    }

    /// Whether any indexed argument holds `target` (left-padded to 32 bytes).
    pub fn references(&self, target: Address) -> bool {
        let padded = target.into_word();
        self.topics.iter().skip(1).any(|topic| *topic == padded)
    }
}

/// Block range bound for a log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockBound {
    Number(u64),
    Latest,
}

/// Filter for one contract/signature pair over a block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    /// `None` matches every event the contract emits.
    pub signature: Option<B256>,
    pub from_block: BlockBound,
    pub to_block: BlockBound,
}

impl LogFilter {
    /// Historical filter over `[from, to]`.
    pub fn range(address: Address, signature: Option<B256>, from: u64, to: u64) -> Self {
        Self {
            address,
            signature,
            from_block: BlockBound::Number(from),
            to_block: BlockBound::Number(to),
        }
    }

    /// Filter for logs produced from now on.
    pub fn live(address: Address, signature: B256) -> Self {
        Self {
            address,
            signature: Some(signature),
            from_block: BlockBound::Latest,
            to_block: BlockBound::Latest,
        }
    }

    /// Whether `log` satisfies the address and signature constraints.
    pub fn matches(&self, log: &LogRecord) -> bool {
        log.address == self.address
            && self
                .signature
                .map_or(true, |sig| log.signature() == Some(sig))
    }
}

/// Stream of live logs. Ends when the underlying subscription closes.
pub type LogStream = BoxStream<'static, NodeResult<LogRecord>>;

/// Receipt-fetch capability.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    /// `Ok(None)` while the transaction has not been included yet.
    async fn fetch_receipt(&self, handle: TxHash) -> NodeResult<Option<Receipt>>;
}

/// Log-query capability.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Ordered logs matching `filter`.
    async fn query_logs(&self, filter: &LogFilter) -> NodeResult<Vec<LogRecord>>;

    /// Long-lived stream of new logs matching `filter`.
    async fn subscribe_logs(&self, filter: &LogFilter) -> NodeResult<LogStream>;
}

/// Slowly-changing chain state served through the facade.
#[async_trait]
pub trait LedgerNode: Send + Sync {
    async fn balance(&self, address: Address) -> NodeResult<U256>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> NodeResult<u128>;

    async fn block_number(&self) -> NodeResult<u64>;
}
