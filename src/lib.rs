//! Resilience layer for a ledger JSON-RPC node.
//!
//! Retries with backoff, TTL caching of slowly-changing chain state, call
//! metrics, transaction receipt monitoring and contract event subscriptions,
//! composed behind [`ResilientRpcFacade`].

pub mod blockchain;
pub mod cache;
pub mod clock;
pub mod config;
pub mod events;
pub mod facade;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod transactions;

pub use config::schema::ResilienceConfig;
pub use facade::ResilientRpcFacade;
pub use lifecycle::Shutdown;
