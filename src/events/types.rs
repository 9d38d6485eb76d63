//! Event subscription types.

use alloy::primitives::{b256, Address, B256};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::blockchain::types::{LogRecord, NodeError};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// keccak256("Approval(address,address,uint256)")
pub const APPROVAL_TOPIC: B256 =
    b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");

#[derive(Debug, Error)]
pub enum EventError {
    #[error("subscription not found: {0}")]
    NotFound(String),

    #[error("subscription {0} is cancelled")]
    Cancelled(String),

    #[error("historical log query for {address} failed: {source}")]
    HistoricalQuery {
        address: Address,
        #[source]
        source: NodeError,
    },
}

pub type EventResult<T> = Result<T, EventError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStatus {
    Active,
    Paused,
    Cancelled,
}

/// A registered interest in one event of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: String,
    pub contract_type: String,
    pub contract_address: Address,
    pub event_type: String,
    pub signature: B256,
    pub status: SubStatus,
    pub created_at_millis: i64,
    pub updated_at_millis: i64,
    pub last_event_at_millis: Option<i64>,
    pub event_count: u64,
}

impl Subscription {
    /// Whether a live log belongs to this subscription.
    pub fn matches(&self, log: &LogRecord) -> bool {
        log.address == self.contract_address && log.signature() == Some(self.signature)
    }

    /// Count one observed event at `now_millis`. Returns the new count.
    pub fn record_event(&mut self, now_millis: i64) -> u64 {
        self.event_count += 1;
        self.last_event_at_millis = Some(now_millis);
        self.updated_at_millis = now_millis;
        self.event_count
    }
}

/// Dispatch key for live logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    Approval,
    Custom,
}

impl EventKind {
    pub fn classify(topic0: Option<B256>) -> Self {
        match topic0 {
            Some(topic) if topic == TRANSFER_TOPIC => EventKind::Transfer,
            Some(topic) if topic == APPROVAL_TOPIC => EventKind::Approval,
            _ => EventKind::Custom,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Transfer => "transfer",
            EventKind::Approval => "approval",
            EventKind::Custom => "custom",
        }
    }
}

/// Receives every live log that passes the listening gate.
pub trait EventHandler: Send + Sync {
    fn handle(&self, kind: EventKind, log: &LogRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn handle(&self, kind: EventKind, log: &LogRecord) {
        match kind {
            EventKind::Transfer => {
                let from = log.topics.get(1).map(|t| Address::from_word(*t));
                let to = log.topics.get(2).map(|t| Address::from_word(*t));
                tracing::info!(
                    contract = %log.address,
                    from = ?from,
                    to = ?to,
                    block = ?log.block_number,
                    "Transfer event"
                );
            }
            EventKind::Approval => {
                let owner = log.topics.get(1).map(|t| Address::from_word(*t));
                let spender = log.topics.get(2).map(|t| Address::from_word(*t));
                tracing::info!(
                    contract = %log.address,
                    owner = ?owner,
                    spender = ?spender,
                    block = ?log.block_number,
                    "Approval event"
                );
            }
            EventKind::Custom => {
                tracing::info!(
                    contract = %log.address,
                    signature = ?log.signature(),
                    block = ?log.block_number,
                    "Contract event"
                );
            }
        }
    }
}

/// Forwards dispatched logs into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<(EventKind, LogRecord)>,
}

impl ChannelEventHandler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(EventKind, LogRecord)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventHandler for ChannelEventHandler {
    fn handle(&self, kind: EventKind, log: &LogRecord) {
        let _ = self.tx.send((kind, log.clone()));
    }
}

/// Event counts for one contract/signature pair over a block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStatistics {
    pub contract_address: Address,
    pub signature: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
    pub total_events: usize,
    pub block_counts: BTreeMap<u64, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListeningStatus {
    pub listening: bool,
    pub live_listeners: usize,
    pub timestamp_millis: i64,
}
