//! Transaction monitoring types.

use alloy::primitives::TxHash;
use serde::Serialize;
use tokio::sync::mpsc;

/// Where a monitored transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Pending,
    Confirmed,
    Failed,
    TimedOut,
}

impl MonitorStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MonitorStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorStatus::Pending => "pending",
            MonitorStatus::Confirmed => "confirmed",
            MonitorStatus::Failed => "failed",
            MonitorStatus::TimedOut => "timed_out",
        }
    }
}

/// Bookkeeping for one polled transaction handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringTask {
    pub handle: TxHash,
    pub interval_secs: u32,
    pub check_count: u32,
    pub started_at_millis: i64,
    pub last_checked_at_millis: Option<i64>,
    pub status: MonitorStatus,
}

impl MonitoringTask {
    pub fn new(handle: TxHash, interval_secs: u32, now_millis: i64) -> Self {
        Self {
            handle,
            interval_secs,
            check_count: 0,
            started_at_millis: now_millis,
            last_checked_at_millis: None,
            status: MonitorStatus::Pending,
        }
    }

    pub fn running_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.started_at_millis)
    }
}

/// Receives the single terminal notification for a monitored handle.
pub trait MonitoringCallback: Send + Sync {
    fn on_confirmed(&self, handle: TxHash, block_number: u64);

    fn on_failed(&self, handle: TxHash, reason: &str);

    fn on_timeout(&self, handle: TxHash);
}

/// Terminal notification as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Confirmed { handle: TxHash, block_number: u64 },
    Failed { handle: TxHash, reason: String },
    TimedOut { handle: TxHash },
}

impl MonitorOutcome {
    pub fn handle(&self) -> TxHash {
        match self {
            MonitorOutcome::Confirmed { handle, .. }
            | MonitorOutcome::Failed { handle, .. }
            | MonitorOutcome::TimedOut { handle } => *handle,
        }
    }

    pub fn status(&self) -> MonitorStatus {
        match self {
            MonitorOutcome::Confirmed { .. } => MonitorStatus::Confirmed,
            MonitorOutcome::Failed { .. } => MonitorStatus::Failed,
            MonitorOutcome::TimedOut { .. } => MonitorStatus::TimedOut,
        }
    }

    /// Deliver this outcome through `callback`.
    pub fn notify(&self, callback: &dyn MonitoringCallback) {
        match self {
            MonitorOutcome::Confirmed {
                handle,
                block_number,
            } => callback.on_confirmed(*handle, *block_number),
            MonitorOutcome::Failed { handle, reason } => callback.on_failed(*handle, reason),
            MonitorOutcome::TimedOut { handle } => callback.on_timeout(*handle),
        }
    }
}

/// Forwards outcomes into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<MonitorOutcome>,
}

impl ChannelCallback {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MonitorOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, outcome: MonitorOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!("Monitor outcome receiver dropped");
        }
    }
}

impl MonitoringCallback for ChannelCallback {
    fn on_confirmed(&self, handle: TxHash, block_number: u64) {
        self.send(MonitorOutcome::Confirmed {
            handle,
            block_number,
        });
    }

    fn on_failed(&self, handle: TxHash, reason: &str) {
        self.send(MonitorOutcome::Failed {
            handle,
            reason: reason.to_string(),
        });
    }

    fn on_timeout(&self, handle: TxHash) {
        self.send(MonitorOutcome::TimedOut { handle });
    }
}

/// Logs every outcome. Used by the binary for `--watch-tx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallback;

impl MonitoringCallback for LoggingCallback {
    fn on_confirmed(&self, handle: TxHash, block_number: u64) {
        tracing::info!(%handle, block_number, "Transaction confirmed");
    }

    fn on_failed(&self, handle: TxHash, reason: &str) {
        tracing::warn!(%handle, reason, "Transaction failed");
    }

    fn on_timeout(&self, handle: TxHash) {
        tracing::warn!(%handle, "Transaction monitoring timed out");
    }
}
