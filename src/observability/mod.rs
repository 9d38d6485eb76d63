//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing macros with structured fields (logging.rs installs the subscriber)
//!     → metrics.rs (MetricsCollector + `metrics` facade)
//!
//! Consumers:
//!     → stdout log lines
//!     → MetricsCollector::snapshot / health (in-process)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;

pub use metrics::{HealthReport, HealthStatus, MetricsCollector, MetricsSnapshot};
