//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (binary):
//!     Load config → Build components → Spawn sweeper / monitors / listeners
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C → trigger() → every task observes ShutdownSignal → exit
//! ```

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownSignal};
