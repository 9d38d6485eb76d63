//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote call (closure returning NodeResult<T>)
//!     → retries.rs (attempt, classify, wait, repeat)
//!     → backoff.rs (delay for attempt k)
//!     → on exhaustion: fallback once, or a typed RetryError
//! ```
//!
//! # Design Decisions
//! - One generic retry path for every remote call
//! - Waits never hold a lock and abort on shutdown
//! - Fallback is never retried

pub mod backoff;
pub mod retries;

pub use retries::{RemoteCall, RetryError, RetryExecutor, RetryPolicy};
