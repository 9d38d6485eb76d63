//! Ledger node integration subsystem.
//!
//! # Data Flow
//! ```text
//! Configuration (RPC URLs, timeouts)
//!     → client.rs (alloy providers, failover, per-call deadline)
//!     → types.rs capabilities (LedgerNode, ReceiptSource, LogSource)
//!     → facade / transactions / events consume the capabilities
//! ```
//!
//! # Design Decisions
//! - Core components depend on the capability traits only
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when the node is unreachable

pub mod client;
pub mod types;

pub use client::BlockchainClient;
pub use types::{
    LedgerNode, LogFilter, LogRecord, LogSource, LogStream, NodeConfig, NodeError, NodeResult,
    Receipt, ReceiptSource,
};
