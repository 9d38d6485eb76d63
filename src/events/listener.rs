//! Live contract listeners and the global listening gate.
//!
//! Each `start_contract_listening` call spawns one task that drains a log
//! stream. The gate is checked per log, so `stop_listening` silences every
//! listener at once without tearing any of them down.

use alloy::primitives::{Address, B256};
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::blockchain::types::{LogFilter, LogRecord};
use crate::events::registry::{EventSubscriptionRegistry, Inner};
use crate::events::types::{EventKind, ListeningStatus, SubStatus};
use crate::observability::metrics;

impl EventSubscriptionRegistry {
    pub fn start_listening(&self) {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            tracing::warn!("Event listening already running");
        } else {
            tracing::info!("Event listening started");
        }
    }

    pub fn stop_listening(&self) {
        self.inner.listening.store(false, Ordering::SeqCst);
        tracing::info!("Event listening stopped");
    }

    pub fn restart_listening(&self) {
        tracing::info!("Restarting event listening");
        self.stop_listening();
        self.start_listening();
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    pub fn listening_status(&self) -> ListeningStatus {
        ListeningStatus {
            listening: self.is_listening(),
            live_listeners: self
                .inner
                .listeners
                .iter()
                .filter(|listener| !listener.is_finished())
                .count(),
            timestamp_millis: self.inner.clock.now_millis(),
        }
    }

    /// Open a live subscription to new `signature` logs of `contract_address`.
    /// Returns `false` if a listener for the pair is already running.
    ///
    /// Setup runs on the spawned task; a failure there is logged and only
    /// affects this listener.
    pub fn start_contract_listening(&self, contract_address: Address, signature: B256) -> bool {
        self.inner.listeners.retain(|_, listener| !listener.is_finished());

        match self.inner.listeners.entry((contract_address, signature)) {
            Entry::Occupied(_) => {
                tracing::warn!(contract = %contract_address, %signature, "Contract already has a live listener");
                false
            }
            Entry::Vacant(vacant) => {
                let join = tokio::spawn(listen(self.inner.clone(), LogFilter::live(contract_address, signature)));
                vacant.insert(join.abort_handle());
                true
            }
        }
    }

    /// Abort every listener and close the gate.
    pub fn shutdown(&self) {
        self.stop_listening();
        let keys: Vec<(Address, B256)> = self.inner.listeners.iter().map(|l| *l.key()).collect();
        for key in keys {
            if let Some((_, abort)) = self.inner.listeners.remove(&key) {
                abort.abort();
            }
        }
        tracing::info!("Event registry shut down");
    }
}

async fn listen(inner: Arc<Inner>, filter: LogFilter) {
    let contract = filter.address;
    let mut stream = match inner.logs.subscribe_logs(&filter).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(contract = %contract, error = %e, "Failed to set up contract listener");
            return;
        }
    };
    tracing::info!(contract = %contract, signature = ?filter.signature, "Listening for contract events");

    let mut shutdown = inner.shutdown.clone();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                tracing::debug!(contract = %contract, "Listener received shutdown signal");
                break;
            }
            next = stream.next() => {
                match next {
                    Some(Ok(log)) => {
                        if inner.listening.load(Ordering::SeqCst) {
                            dispatch(&inner, &log);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(contract = %contract, error = %e, "Contract listener error");
                    }
                    None => {
                        tracing::info!(contract = %contract, "Contract log stream closed");
                        break;
                    }
                }
            }
        }
    }
}

fn dispatch(inner: &Inner, log: &LogRecord) {
    let now = inner.clock.now_millis();
    for mut record in inner.subscriptions.iter_mut() {
        let subscription = &mut record.subscription;
        if subscription.status == SubStatus::Active && subscription.matches(log) {
            subscription.record_event(now);
        }
    }

    let kind = EventKind::classify(log.signature());
    metrics::record_event_dispatched(kind.as_str());
    inner.handler.handle(kind, log);
}
