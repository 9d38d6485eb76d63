//! Shared utilities for integration and load testing.

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use ledger_resilience::blockchain::{
    LedgerNode, LogFilter, LogRecord, LogSource, LogStream, NodeError, NodeResult, Receipt,
    ReceiptSource,
};

/// In-memory node whose failures are programmable.
///
/// Every capability call first consumes one pending failure, if any.
#[derive(Default)]
pub struct MockNode {
    pub calls: AtomicU32,
    failures_left: AtomicU32,
    failure: Mutex<Option<NodeError>>,
    balances: Mutex<HashMap<Address, U256>>,
    gas_price: Mutex<u128>,
    block_number: Mutex<u64>,
    receipts: Mutex<HashMap<TxHash, Receipt>>,
    logs: Mutex<Vec<LogRecord>>,
    feeds: Mutex<HashMap<Address, mpsc::UnboundedReceiver<NodeResult<LogRecord>>>>,
}

#[allow(dead_code)]
impl MockNode {
    pub fn new() -> Self {
        let node = Self::default();
        *node.gas_price.lock().unwrap() = 15_000_000_000;
        *node.block_number.lock().unwrap() = 1_000;
        node
    }

    /// Fail the next `count` calls with `error`.
    pub fn fail_next(&self, count: u32, error: NodeError) {
        *self.failure.lock().unwrap() = Some(error);
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.balances.lock().unwrap().insert(address, balance);
    }

    pub fn set_block_number(&self, block: u64) {
        *self.block_number.lock().unwrap() = block;
    }

    pub fn confirm(&self, handle: TxHash, success: bool, block_number: u64) {
        self.receipts.lock().unwrap().insert(
            handle,
            Receipt {
                success,
                block_number,
            },
        );
    }

    pub fn push_log(&self, log: LogRecord) {
        self.logs.lock().unwrap().push(log);
    }

    /// Wire a live feed for `address`; unwired addresses fail to subscribe.
    pub fn live_feed(&self, address: Address) -> mpsc::UnboundedSender<NodeResult<LogRecord>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().insert(address, rx);
        tx
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> NodeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if consumed {
            let error = self.failure.lock().unwrap().clone();
            return Err(error.unwrap_or_else(|| NodeError::Rpc("injected".into())));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerNode for MockNode {
    async fn balance(&self, address: Address) -> NodeResult<U256> {
        self.enter()?;
        Ok(self.balances.lock().unwrap().get(&address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> NodeResult<u128> {
        self.enter()?;
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn block_number(&self) -> NodeResult<u64> {
        self.enter()?;
        Ok(*self.block_number.lock().unwrap())
    }
}

#[async_trait]
impl ReceiptSource for MockNode {
    async fn fetch_receipt(&self, handle: TxHash) -> NodeResult<Option<Receipt>> {
        self.enter()?;
        Ok(self.receipts.lock().unwrap().get(&handle).copied())
    }
}

#[async_trait]
impl LogSource for MockNode {
    async fn query_logs(&self, filter: &LogFilter) -> NodeResult<Vec<LogRecord>> {
        self.enter()?;
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> NodeResult<LogStream> {
        let rx = self
            .feeds
            .lock()
            .unwrap()
            .remove(&filter.address)
            .ok_or_else(|| NodeError::NotAvailable(format!("no feed for {}", filter.address)))?;
        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed())
    }
}

#[allow(dead_code)]
pub fn event_log(address: Address, topics: Vec<B256>, block: u64) -> LogRecord {
    LogRecord {
        address,
        topics,
        data: Bytes::new(),
        block_number: Some(block),
        transaction_hash: None,
        log_index: None,
    }
}
