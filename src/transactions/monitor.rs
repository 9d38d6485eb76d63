//! Receipt polling for submitted transactions.

use alloy::primitives::TxHash;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::blockchain::types::ReceiptSource;
use crate::clock::SharedClock;
use crate::config::MonitorConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::transactions::types::{MonitorOutcome, MonitorStatus, MonitoringCallback, MonitoringTask};

struct Slot {
    /// Distinguishes this task from a later one for the same handle.
    serial: u64,
    task: MonitoringTask,
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
}

struct Inner {
    source: Arc<dyn ReceiptSource>,
    config: MonitorConfig,
    clock: SharedClock,
    tasks: DashMap<TxHash, Slot>,
    next_serial: AtomicU64,
    shutdown: ShutdownSignal,
}

/// Polls the receipt source for every monitored handle until it reaches a
/// terminal state.
///
/// Each handle gets its own task. Checks within one task are sequential, and
/// every task delivers at most one terminal notification.
#[derive(Clone)]
pub struct TransactionMonitor {
    inner: Arc<Inner>,
}

impl TransactionMonitor {
    pub fn new(
        source: Arc<dyn ReceiptSource>,
        config: MonitorConfig,
        clock: SharedClock,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                clock,
                tasks: DashMap::new(),
                next_serial: AtomicU64::new(1),
                shutdown,
            }),
        }
    }

    /// Begin polling `handle` every `interval_secs` (0 means the configured
    /// default). Returns `false` if the handle is already monitored.
    pub fn start_monitoring(
        &self,
        handle: TxHash,
        interval_secs: u32,
        callback: Arc<dyn MonitoringCallback>,
    ) -> bool {
        let interval_secs = if interval_secs == 0 {
            self.inner.config.default_interval_secs.max(1)
        } else {
            interval_secs
        };

        match self.inner.tasks.entry(handle) {
            Entry::Occupied(_) => {
                tracing::warn!(%handle, "Transaction already monitored");
                false
            }
            Entry::Vacant(vacant) => {
                let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);
                let cancelled = Arc::new(AtomicBool::new(false));
                let join = tokio::spawn(poll_loop(
                    self.inner.clone(),
                    handle,
                    serial,
                    Duration::from_secs(u64::from(interval_secs)),
                    callback,
                    cancelled.clone(),
                ));
                vacant.insert(Slot {
                    serial,
                    task: MonitoringTask::new(handle, interval_secs, self.inner.clock.now_millis()),
                    cancelled,
                    abort: join.abort_handle(),
                });
                tracing::info!(%handle, interval_secs, "Started monitoring transaction");
                true
            }
        }
    }

    pub fn start_monitoring_default(&self, handle: TxHash, callback: Arc<dyn MonitoringCallback>) -> bool {
        self.start_monitoring(handle, self.inner.config.default_interval_secs, callback)
    }

    /// Cancel polling for `handle` whatever its state. No callback fires for
    /// a stopped task.
    pub fn stop_monitoring(&self, handle: &TxHash) -> bool {
        match self.inner.tasks.remove(handle) {
            Some((_, slot)) => {
                slot.cancelled.store(true, Ordering::SeqCst);
                slot.abort.abort();
                tracing::info!(%handle, "Stopped monitoring transaction");
                true
            }
            None => {
                tracing::warn!(%handle, "Transaction not monitored");
                false
            }
        }
    }

    /// Status of `handle`. `Pending` also means "not tracked".
    pub fn get_monitoring_status(&self, handle: &TxHash) -> MonitorStatus {
        self.inner
            .tasks
            .get(handle)
            .map(|slot| slot.task.status)
            .unwrap_or(MonitorStatus::Pending)
    }

    pub fn task_details(&self, handle: &TxHash) -> Option<MonitoringTask> {
        self.inner.tasks.get(handle).map(|slot| slot.task.clone())
    }

    pub fn all_statuses(&self) -> HashMap<TxHash, MonitorStatus> {
        self.inner
            .tasks
            .iter()
            .map(|slot| (*slot.key(), slot.task.status))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Stop every task and clear the table.
    pub fn shutdown(&self) {
        let handles: Vec<TxHash> = self.inner.tasks.iter().map(|slot| *slot.key()).collect();
        for handle in handles {
            if let Some((_, slot)) = self.inner.tasks.remove(&handle) {
                slot.cancelled.store(true, Ordering::SeqCst);
                slot.abort.abort();
            }
        }
        tracing::info!("Transaction monitor shut down");
    }
}

impl Inner {
    /// Count one check. `None` once this task no longer owns the entry.
    fn record_check(&self, handle: &TxHash, serial: u64) -> Option<u32> {
        let mut slot = self.tasks.get_mut(handle)?;
        if slot.serial != serial {
            return None;
        }
        slot.task.check_count += 1;
        slot.task.last_checked_at_millis = Some(self.clock.now_millis());
        Some(slot.task.check_count)
    }

    /// Remove this task's own entry and stamp it with `status`. `None` if a
    /// stop or a newer task got there first.
    fn finish(&self, handle: &TxHash, serial: u64, status: MonitorStatus) -> Option<MonitoringTask> {
        let (_, slot) = self.tasks.remove_if(handle, |_, slot| slot.serial == serial)?;
        let mut task = slot.task;
        task.status = status;
        Some(task)
    }
}

async fn poll_loop(
    inner: Arc<Inner>,
    handle: TxHash,
    serial: u64,
    interval: Duration,
    callback: Arc<dyn MonitoringCallback>,
    cancelled: Arc<AtomicBool>,
) {
    let mut shutdown = inner.shutdown.clone();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                inner.finish(&handle, serial, MonitorStatus::Pending);
                tracing::debug!(%handle, "Monitor task received shutdown signal");
                return;
            }
            _ = ticker.tick() => {}
        }

        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        let result = inner.source.fetch_receipt(handle).await;

        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        let Some(check_count) = inner.record_check(&handle, serial) else {
            return;
        };

        let outcome = match result {
            Ok(Some(receipt)) if receipt.success => Some(MonitorOutcome::Confirmed {
                handle,
                block_number: receipt.block_number,
            }),
            Ok(Some(receipt)) => Some(MonitorOutcome::Failed {
                handle,
                reason: format!("transaction reverted in block {}", receipt.block_number),
            }),
            Err(e) if !e.is_transient() => {
                tracing::error!(%handle, error = %e, "Receipt check failed");
                Some(MonitorOutcome::Failed {
                    handle,
                    reason: e.to_string(),
                })
            }
            pending => {
                if let Err(e) = pending {
                    tracing::warn!(%handle, check_count, error = %e, "Receipt not available yet");
                }
                (check_count > inner.config.max_checks).then_some(MonitorOutcome::TimedOut { handle })
            }
        };

        let Some(outcome) = outcome else {
            tracing::debug!(%handle, check_count, "Transaction still pending");
            continue;
        };

        // A concurrent stop wins: only the owner of the entry notifies.
        if let Some(task) = inner.finish(&handle, serial, outcome.status()) {
            tracing::info!(
                %handle,
                check_count,
                status = task.status.as_str(),
                elapsed_ms = task.running_millis(inner.clock.now_millis()),
                "Transaction monitoring finished"
            );
            metrics::record_monitor_outcome(task.status.as_str());
            outcome.notify(callback.as_ref());
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::types::{NodeError, NodeResult, Receipt};
    use crate::clock::{Clock, ManualClock};
    use crate::lifecycle::Shutdown;
    use crate::transactions::types::ChannelCallback;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    /// Answers `None` until the configured poll, then the receipt.
    struct ScriptedSource {
        calls: AtomicU32,
        ready_on_call: u32,
        receipt: NodeResult<Receipt>,
    }

    impl ScriptedSource {
        fn new(ready_on_call: u32, receipt: NodeResult<Receipt>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                ready_on_call,
                receipt,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReceiptSource for ScriptedSource {
        async fn fetch_receipt(&self, _handle: TxHash) -> NodeResult<Option<Receipt>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.ready_on_call {
                self.receipt.clone().map(Some)
            } else {
                Ok(None)
            }
        }
    }

    fn monitor(source: Arc<dyn ReceiptSource>, max_checks: u32) -> TransactionMonitor {
        TransactionMonitor::new(
            source,
            MonitorConfig {
                default_interval_secs: 3,
                max_checks,
            },
            Arc::new(ManualClock::new(0)),
            ShutdownSignal::never(),
        )
    }

    const CONFIRMED: Receipt = Receipt {
        success: true,
        block_number: 42,
    };

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_after_third_poll() {
        let source = ScriptedSource::new(3, Ok(CONFIRMED));
        let monitor = monitor(source.clone(), 100);
        let (callback, mut rx) = ChannelCallback::channel();
        let handle = TxHash::repeat_byte(1);

        assert!(monitor.start_monitoring_default(handle, Arc::new(callback)));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(
            outcome,
            MonitorOutcome::Confirmed {
                handle,
                block_number: 42
            }
        );
        assert_eq!(source.calls(), 3);
        assert_eq!(monitor.active_count(), 0);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let source = ScriptedSource::new(u32::MAX, Ok(CONFIRMED));
        let monitor = monitor(source, 100);
        let handle = TxHash::repeat_byte(2);
        let (callback, _rx) = ChannelCallback::channel();
        let callback: Arc<dyn MonitoringCallback> = Arc::new(callback);

        assert!(monitor.start_monitoring(handle, 1, callback.clone()));
        assert!(!monitor.start_monitoring(handle, 1, callback));
        assert_eq!(monitor.active_count(), 1);
        assert_eq!(monitor.task_details(&handle).unwrap().interval_secs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once() {
        let source = ScriptedSource::new(u32::MAX, Ok(CONFIRMED));
        let monitor = monitor(source.clone(), 3);
        let (callback, mut rx) = ChannelCallback::channel();
        let handle = TxHash::repeat_byte(3);

        monitor.start_monitoring(handle, 1, Arc::new(callback));

        assert_eq!(rx.recv().await.unwrap(), MonitorOutcome::TimedOut { handle });
        assert_eq!(source.calls(), 4);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls(), 4);
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.get_monitoring_status(&handle), MonitorStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_receipt_reports_failure() {
        let source = ScriptedSource::new(
            1,
            Ok(Receipt {
                success: false,
                block_number: 9,
            }),
        );
        let monitor = monitor(source, 100);
        let (callback, mut rx) = ChannelCallback::channel();
        let handle = TxHash::repeat_byte(4);

        monitor.start_monitoring(handle, 1, Arc::new(callback));

        match rx.recv().await.unwrap() {
            MonitorOutcome::Failed { reason, .. } => assert!(reason.contains("block 9")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_response_is_terminal_failure() {
        let source = ScriptedSource::new(1, Err(NodeError::InvalidResponse("bad receipt".into())));
        let monitor = monitor(source.clone(), 100);
        let (callback, mut rx) = ChannelCallback::channel();
        let handle = TxHash::repeat_byte(5);

        monitor.start_monitoring(handle, 1, Arc::new(callback));

        match rx.recv().await.unwrap() {
            MonitorOutcome::Failed { reason, .. } => assert!(reason.contains("bad receipt")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_stay_pending() {
        let source = ScriptedSource::new(1, Err(NodeError::Timeout(5)));
        let monitor = monitor(source.clone(), 100);
        let (callback, mut rx) = ChannelCallback::channel();
        let handle = TxHash::repeat_byte(6);

        monitor.start_monitoring(handle, 1, Arc::new(callback));
        time::sleep(Duration::from_millis(4500)).await;

        assert_eq!(source.calls(), 5);
        assert!(rx.try_recv().is_err());
        let task = monitor.task_details(&handle).unwrap();
        assert_eq!(task.status, MonitorStatus::Pending);
        assert_eq!(task.check_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_polls_and_callbacks() {
        let source = ScriptedSource::new(3, Ok(CONFIRMED));
        let monitor = monitor(source.clone(), 100);
        let (callback, mut rx) = ChannelCallback::channel();
        let handle = TxHash::repeat_byte(7);

        monitor.start_monitoring(handle, 1, Arc::new(callback));
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(source.calls(), 2);

        assert!(monitor.stop_monitoring(&handle));
        assert!(!monitor.stop_monitoring(&handle));

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls(), 2);
        assert!(rx.try_recv().is_err());
        assert!(monitor.all_statuses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_gets_fresh_task() {
        let source = ScriptedSource::new(u32::MAX, Ok(CONFIRMED));
        let monitor = monitor(source, 100);
        let handle = TxHash::repeat_byte(8);
        let (callback, _rx) = ChannelCallback::channel();
        let callback: Arc<dyn MonitoringCallback> = Arc::new(callback);

        monitor.start_monitoring(handle, 1, callback.clone());
        time::sleep(Duration::from_millis(2500)).await;
        monitor.stop_monitoring(&handle);

        assert!(monitor.start_monitoring(handle, 1, callback));
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.task_details(&handle).unwrap().check_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_ends_tasks() {
        let source = ScriptedSource::new(u32::MAX, Ok(CONFIRMED));
        let shutdown = Shutdown::new();
        let monitor = TransactionMonitor::new(
            source.clone(),
            MonitorConfig::default(),
            Arc::new(ManualClock::new(0)),
            shutdown.subscribe(),
        );
        let (callback, _rx) = ChannelCallback::channel();
        monitor.start_monitoring(TxHash::repeat_byte(9), 1, Arc::new(callback));
        time::sleep(Duration::from_millis(500)).await;

        shutdown.trigger();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.active_count(), 0);
        assert_eq!(source.calls(), 1);
    }

    /// Parks the first receipt query until released, then answers `None`.
    struct ParkedSource {
        calls: AtomicU32,
        release: Notify,
    }

    #[async_trait]
    impl ReceiptSource for ParkedSource {
        async fn fetch_receipt(&self, _handle: TxHash) -> NodeResult<Option<Receipt>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 1 {
                self.release.notified().await;
                return Ok(Some(CONFIRMED));
            }
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_inflight_check_stays_silent() {
        let source = Arc::new(ParkedSource {
            calls: AtomicU32::new(0),
            release: Notify::new(),
        });
        let monitor = monitor(source.clone(), 100);
        let (callback, mut rx) = ChannelCallback::channel();
        let callback: Arc<dyn MonitoringCallback> = Arc::new(callback);
        let handle = TxHash::repeat_byte(10);

        monitor.start_monitoring(handle, 1, callback.clone());
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        assert!(monitor.stop_monitoring(&handle));
        source.release.notify_one();
        time::sleep(Duration::from_secs(5)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.active_count(), 0);

        assert!(monitor.start_monitoring(handle, 1, callback));
        assert_eq!(monitor.task_details(&handle).unwrap().check_count, 0);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.task_details(&handle).unwrap().check_count, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_only_for_owning_task() {
        let source = ScriptedSource::new(u32::MAX, Ok(CONFIRMED));
        let clock = ManualClock::new(1_000);
        let monitor = TransactionMonitor::new(
            source,
            MonitorConfig::default(),
            Arc::new(clock.clone()),
            ShutdownSignal::never(),
        );
        let (callback, _rx) = ChannelCallback::channel();
        let handle = TxHash::repeat_byte(11);
        monitor.start_monitoring(handle, 60, Arc::new(callback));
        let serial = monitor.inner.tasks.get(&handle).unwrap().serial;

        assert!(monitor.inner.finish(&handle, serial + 1, MonitorStatus::Confirmed).is_none());
        assert_eq!(monitor.active_count(), 1);

        clock.advance_millis(2_500);
        let task = monitor.inner.finish(&handle, serial, MonitorStatus::Confirmed).unwrap();
        assert_eq!(task.status, MonitorStatus::Confirmed);
        assert_eq!(task.running_millis(clock.now_millis()), 2_500);
        assert!(monitor.inner.finish(&handle, serial, MonitorStatus::Failed).is_none());
        assert_eq!(monitor.active_count(), 0);
    }
}
