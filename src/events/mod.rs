//! Contract event subscriptions.
//!
//! # Data Flow
//! ```text
//! registry.rs
//!     → subscription table (create / pause / resume / cancel / count)
//!     → historical queries via LogSource::query_logs
//!
//! listener.rs
//!     → one task per contract/signature pair draining LogSource::subscribe_logs
//!     → listening gate checked per log
//!     → matching Active subscriptions counted, EventHandler invoked by kind
//! ```

mod listener;
pub mod registry;
pub mod types;

pub use registry::EventSubscriptionRegistry;
pub use types::{
    ChannelEventHandler, EventError, EventHandler, EventKind, EventResult, EventStatistics,
    ListeningStatus, LoggingEventHandler, SubStatus, Subscription, APPROVAL_TOPIC, TRANSFER_TOPIC,
};
