//! Subscription bookkeeping and historical log queries.

use alloy::primitives::{Address, B256};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;

use crate::blockchain::types::{LogFilter, LogRecord, LogSource};
use crate::clock::SharedClock;
use crate::events::types::{EventError, EventHandler, EventResult, EventStatistics, SubStatus, Subscription};
use crate::lifecycle::ShutdownSignal;

pub(super) struct Record {
    /// Insertion order, used to break ties between equal timestamps.
    pub(super) seq: u64,
    pub(super) subscription: Subscription,
}

pub(super) struct Inner {
    pub(super) logs: Arc<dyn LogSource>,
    pub(super) handler: Arc<dyn EventHandler>,
    pub(super) clock: SharedClock,
    pub(super) subscriptions: DashMap<String, Record>,
    pub(super) next_seq: AtomicU64,
    pub(super) listening: AtomicBool,
    /// One live listener per contract and event signature.
    pub(super) listeners: DashMap<(Address, B256), AbortHandle>,
    pub(super) shutdown: ShutdownSignal,
}

/// Owns event subscriptions and the live listeners that feed them.
#[derive(Clone)]
pub struct EventSubscriptionRegistry {
    pub(super) inner: Arc<Inner>,
}

impl EventSubscriptionRegistry {
    /// The listening gate starts closed; call `start_listening` to open it.
    pub fn new(
        logs: Arc<dyn LogSource>,
        handler: Arc<dyn EventHandler>,
        clock: SharedClock,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                logs,
                handler,
                clock,
                subscriptions: DashMap::new(),
                next_seq: AtomicU64::new(0),
                listening: AtomicBool::new(false),
                listeners: DashMap::new(),
                shutdown,
            }),
        }
    }

    pub fn create_subscription(
        &self,
        contract_type: &str,
        contract_address: Address,
        event_type: &str,
        signature: B256,
    ) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = self.inner.clock.now_millis();
        let subscription = Subscription {
            id: id.clone(),
            contract_type: contract_type.to_string(),
            contract_address,
            event_type: event_type.to_string(),
            signature,
            status: SubStatus::Active,
            created_at_millis: now,
            updated_at_millis: now,
            last_event_at_millis: None,
            event_count: 0,
        };
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.insert(id.clone(), Record { seq, subscription });

        tracing::info!(
            subscription = %id,
            contract_type,
            event_type,
            contract = %contract_address,
            "Created event subscription"
        );
        id
    }

    pub fn cancel_subscription(&self, id: &str) -> EventResult<()> {
        self.transition(id, SubStatus::Cancelled)
    }

    pub fn pause_subscription(&self, id: &str) -> EventResult<()> {
        self.transition(id, SubStatus::Paused)
    }

    pub fn resume_subscription(&self, id: &str) -> EventResult<()> {
        self.transition(id, SubStatus::Active)
    }

    /// Cancelled is final; moving to the current state is a no-op.
    fn transition(&self, id: &str, target: SubStatus) -> EventResult<()> {
        let mut record = self
            .inner
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| EventError::NotFound(id.to_string()))?;
        let subscription = &mut record.subscription;

        if subscription.status == target {
            return Ok(());
        }
        if subscription.status == SubStatus::Cancelled {
            tracing::warn!(subscription = %id, target = ?target, "Rejected transition of cancelled subscription");
            return Err(EventError::Cancelled(id.to_string()));
        }

        subscription.status = target;
        subscription.updated_at_millis = self.inner.clock.now_millis();
        tracing::info!(subscription = %id, status = ?target, "Subscription status changed");
        Ok(())
    }

    /// Record one observed event. Returns the new count.
    pub fn update_event_count(&self, id: &str) -> EventResult<u64> {
        let mut record = self
            .inner
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| EventError::NotFound(id.to_string()))?;
        Ok(record.subscription.record_event(self.inner.clock.now_millis()))
    }

    pub fn get_subscription(&self, id: &str) -> Option<Subscription> {
        self.inner
            .subscriptions
            .get(id)
            .map(|record| record.subscription.clone())
    }

    /// Active subscriptions, newest first.
    pub fn active_subscriptions(&self) -> Vec<Subscription> {
        self.collect_newest_first(|s| s.status == SubStatus::Active)
    }

    /// Every subscription of `contract_type` regardless of status, newest first.
    pub fn subscriptions_by_contract_type(&self, contract_type: &str) -> Vec<Subscription> {
        self.collect_newest_first(|s| s.contract_type == contract_type)
    }

    fn collect_newest_first(&self, keep: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        let mut matched: Vec<(i64, u64, Subscription)> = self
            .inner
            .subscriptions
            .iter()
            .filter(|record| keep(&record.subscription))
            .map(|record| {
                (
                    record.subscription.created_at_millis,
                    record.seq,
                    record.subscription.clone(),
                )
            })
            .collect();
        matched.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        matched.into_iter().map(|(_, _, s)| s).collect()
    }

    /// Logs of `contract_address` in `[from_block, to_block]`, optionally
    /// restricted to one event signature.
    pub async fn get_historical_events(
        &self,
        contract_address: Address,
        signature: Option<B256>,
        from_block: u64,
        to_block: u64,
    ) -> EventResult<Vec<LogRecord>> {
        let filter = LogFilter::range(contract_address, signature, from_block, to_block);
        let logs = self
            .inner
            .logs
            .query_logs(&filter)
            .await
            .map_err(|source| EventError::HistoricalQuery {
                address: contract_address,
                source,
            })?;

        tracing::debug!(
            contract = %contract_address,
            from_block,
            to_block,
            count = logs.len(),
            "Fetched historical events"
        );
        Ok(logs)
    }

    /// One query per contract, concatenated in the order given. The first
    /// failing contract aborts the whole fetch.
    pub async fn get_multi_contract_historical_events(
        &self,
        contract_addresses: &[Address],
        signature: Option<B256>,
        from_block: u64,
        to_block: u64,
    ) -> EventResult<Vec<LogRecord>> {
        let mut all = Vec::new();
        for address in contract_addresses {
            let logs = self
                .get_historical_events(*address, signature, from_block, to_block)
                .await
                .inspect_err(|e| tracing::error!(error = %e, "Multi-contract historical fetch aborted"))?;
            all.extend(logs);
        }
        Ok(all)
    }

    /// Logs of `contract_address` whose indexed arguments reference `target`.
    pub async fn get_address_historical_events(
        &self,
        contract_address: Address,
        target: Address,
        from_block: u64,
        to_block: u64,
    ) -> EventResult<Vec<LogRecord>> {
        let logs = self
            .get_historical_events(contract_address, None, from_block, to_block)
            .await?;
        Ok(logs.into_iter().filter(|log| log.references(target)).collect())
    }

    /// Total and per-block event counts over a range.
    pub async fn event_statistics(
        &self,
        contract_address: Address,
        signature: Option<B256>,
        from_block: u64,
        to_block: u64,
    ) -> EventResult<EventStatistics> {
        let logs = self
            .get_historical_events(contract_address, signature, from_block, to_block)
            .await?;

        let mut block_counts = BTreeMap::new();
        for log in &logs {
            if let Some(block) = log.block_number {
                *block_counts.entry(block).or_insert(0) += 1;
            }
        }

        Ok(EventStatistics {
            contract_address,
            signature,
            from_block,
            to_block,
            total_events: logs.len(),
            block_counts,
        })
    }
}
