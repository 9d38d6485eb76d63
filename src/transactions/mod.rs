//! Transaction confirmation tracking.
//!
//! # Data Flow
//! ```text
//! start_monitoring(handle)
//!     → monitor.rs spawns one polling task per handle
//!     → every interval: ReceiptSource::fetch_receipt
//!     → Confirmed / Failed / TimedOut → entry removed, callback notified once
//! ```

pub mod monitor;
pub mod types;

pub use monitor::TransactionMonitor;
pub use types::{
    ChannelCallback, LoggingCallback, MonitorOutcome, MonitorStatus, MonitoringCallback,
    MonitoringTask,
};
