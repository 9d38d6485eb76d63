//! Read-through caching for slowly-changing chain data.
//!
//! # Data Flow
//! ```text
//! facade lookup
//!     → chain.rs (pick category: balances / gas price / block number)
//!     → ttl.rs (DashMap of CacheEntry, expiry checked on every get)
//!
//! sweeper task (chain.rs)
//!     → every sweep_interval_secs: drop expired entries, report sizes
//! ```
//!
//! # Design Decisions
//! - A cache is an optimization: failures degrade to a miss, never an error
//! - Correctness of `get` does not depend on the sweeper
//! - Time comes from an injected clock so expiry is testable

pub mod chain;
pub mod ttl;

pub use chain::{CacheStats, ChainCache};
pub use ttl::{CacheEntry, TtlCache};
