use crate::booking::catalog::Screen;
use crate::booking::ledger::{Order, OrderRequest};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::EngineResult;
use crate::feeds::simulated::Quote;
use crate::paper::types::{Account, SettlePath, Side, Trade, TradeDuration};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

// ── Engine State Machine ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Loading,
    Running,
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Running => write!(f, "running"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

/// Trade request after boundary validation.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub symbol: String,
    pub side: Side,
    pub stake: f64,
    pub duration: TradeDuration,
}

// ── Messages INTO the engine (bounded channels) ──

#[derive(Debug)]
pub enum EngineEvent {
    Tick,
    Quote(Quote),
    /// Deadline task for a trade fired
    SettleDue { trade_id: String },
    PlaceTrade {
        request: TradeRequest,
        reply: oneshot::Sender<EngineResult<Trade>>,
    },
    CreateOrder {
        request: OrderRequest,
        reply: oneshot::Sender<EngineResult<Order>>,
    },
    ConfirmOrder {
        order_id: String,
        reply: oneshot::Sender<EngineResult<Order>>,
    },
    CancelOrder {
        order_id: String,
        reply: oneshot::Sender<EngineResult<Order>>,
    },
    Shutdown,
}

// ── Messages OUT of the engine ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct Countdown {
    pub id: String,
    pub remaining_seconds: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "trade_placed")]
    TradePlaced { trade: Trade },

    #[serde(rename = "trade_tick")]
    TradeTick { pending: Vec<Countdown> },

    #[serde(rename = "trade_settled")]
    TradeSettled {
        trade_id: String,
        symbol: String,
        profit: f64,
        balance: f64,
        path: SettlePath,
        timestamp: String,
    },

    #[serde(rename = "account_update")]
    AccountUpdate { account: Account },

    #[serde(rename = "order_update")]
    OrderUpdate { order: Order },

    #[serde(rename = "quote")]
    Quote { symbol: String, price: f64, timestamp: String },

    #[serde(rename = "storage_error")]
    StorageError { key: String, error: String },

    #[serde(rename = "engine_state")]
    EngineStateMsg { state: String, reason: String },
}

// ── Storage commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    /// Replace the JSON value stored under `key`
    Put { key: String, value: String },
    /// Replace several keys in one transaction; all land or none do
    PutBatch { entries: Vec<(String, String)> },
}

// ── Engine snapshot for dashboard (sent via watch channel) ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineSnapshot {
    pub engine_state: EngineState,
    pub account: Account,
    pub trades: Vec<Trade>,
    pub orders: Vec<Order>,
    pub screens: Vec<Screen>,
    pub quotes: Vec<Quote>,
    pub updated_at: String,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            engine_state: EngineState::Loading,
            account: Account::new(0.0),
            trades: Vec::new(),
            orders: Vec::new(),
            screens: Vec::new(),
            quotes: Vec::new(),
            updated_at: String::new(),
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub ticks_processed: AtomicU64,
    pub quotes_received: AtomicU64,
    pub trades_placed: AtomicU64,
    pub trades_settled: AtomicU64,
    pub orders_created: AtomicU64,
    pub storage_writes: AtomicU64,
    pub storage_errors: AtomicU64,
    pub errors_recovered: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            ticks_processed: AtomicU64::new(0),
            quotes_received: AtomicU64::new(0),
            trades_placed: AtomicU64::new(0),
            trades_settled: AtomicU64::new(0),
            orders_created: AtomicU64::new(0),
            storage_writes: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
            errors_recovered: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,

    // Engine -> HTTP/WS: latest snapshot (watch = single producer, multi consumer)
    pub snapshot_tx: watch::Sender<EngineSnapshot>,
    pub snapshot_rx: watch::Receiver<EngineSnapshot>,

    // Engine -> WS clients: event stream
    pub ws_tx: broadcast::Sender<WsMessage>,

    // HTTP/tick/feed/scheduler -> Engine: bounded event channel
    pub engine_tx: mpsc::Sender<EngineEvent>,

    // Engine -> storage writer: bounded command channel
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        engine_tx: mpsc::Sender<EngineEvent>,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(2048);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

        Arc::new(Self {
            config,
            db,
            snapshot_tx,
            snapshot_rx,
            ws_tx,
            engine_tx,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }
}
