mod booking;
mod config;
mod db;
mod errors;
mod feeds;
mod paper;
mod risk;
mod server;
mod state;

use crate::booking::catalog::default_screens;
use crate::booking::ledger::{BookingLedger, Order};
use crate::config::AppConfig;
use crate::errors::{EngineError, EngineResult};
use crate::feeds::simulated::{self, Quote, QuoteBoard};
use crate::paper::scheduler::SettlementScheduler;
use crate::paper::simulator::TradeBook;
use crate::paper::types::{Account, Settlement, Trade};
use crate::state::*;
use chrono::{DateTime, Utc};
use portable_atomic::Ordering;
use rand::rngs::StdRng;
use rand::SeedableRng;
use smallvec::SmallVec;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Persist every symbol's quote history once per this many quotes
const QUOTE_PERSIST_EVERY: u64 = 10;

#[tokio::main]
async fn main() {
    eprintln!("[ledtrade] binary started, setting up logging...");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("ledtrade engine starting");

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    // Create bounded channels
    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(512);
    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(1024);

    let app_state = AppState::new(cfg.clone(), db_pool, engine_tx.clone(), db_tx);

    // ── Spawn tasks ──

    // 1. Storage writer task (dedicated, the only writer)
    let writer_state = app_state.clone();
    tokio::spawn(async move {
        db::run_db_writer(writer_state, db_rx).await;
    });

    // 2. Simulated quote feed
    let feed_rng = match cfg.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_entropy(),
    };
    let feed_tx = engine_tx.clone();
    let quote_interval = cfg.quote_interval_ms;
    tokio::spawn(async move {
        simulated::run_quote_feed(quote_interval, feed_rng, feed_tx).await;
    });

    // 3. Tick generator (1-second interval)
    let tick_tx = engine_tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            if tick_tx.send(EngineEvent::Tick).await.is_err() {
                break;
            }
        }
    });

    // 4. Engine task (sole owner of trades, account and orders)
    let engine_state = app_state.clone();
    let engine_cfg = cfg.clone();
    tokio::spawn(async move {
        run_engine(engine_state, engine_cfg, engine_rx).await;
    });

    // 5. Ctrl-C -> Shutdown event
    let shutdown_tx = engine_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received");
            let _ = shutdown_tx.send(EngineEvent::Shutdown).await;
        }
    });

    // 6. Axum HTTP + WS server
    let app = server::router(app_state.clone());
    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}

type Actions = SmallVec<[EngineAction; 16]>;

/// Side effects produced by one engine event, executed after the mutation.
#[derive(Debug)]
enum EngineAction {
    Broadcast(WsMessage),
    DbWrite(DbCommand),
}

/// A reply held back until the snapshot reflects the mutation.
enum Reply {
    Trade(oneshot::Sender<EngineResult<Trade>>, EngineResult<Trade>),
    Order(oneshot::Sender<EngineResult<Order>>, EngineResult<Order>),
}

impl Reply {
    fn send(self) {
        match self {
            Reply::Trade(tx, result) => {
                let _ = tx.send(result);
            }
            Reply::Order(tx, result) => {
                let _ = tx.send(result);
            }
        }
    }
}

/// Engine-owned state. Nothing outside the engine task touches it.
struct EngineCore {
    engine_state: EngineState,
    book: TradeBook,
    ledger: BookingLedger,
    quotes: QuoteBoard,
    scheduler: SettlementScheduler,
    grace_secs: u64,
    quote_counter: u64,
}

impl EngineCore {
    /// Rebuild engine state from storage. Unreadable keys start empty.
    fn load(state: &Arc<AppState>, config: &AppConfig) -> Self {
        let account: Account = restore_or_log(state, db::KEY_ACCOUNT)
            .unwrap_or_else(|| Account::new(config.initial_balance));
        let trades: Vec<Trade> = restore_or_log(state, db::KEY_TRADES).unwrap_or_default();
        let orders: Vec<Order> = restore_or_log(state, db::KEY_ORDERS).unwrap_or_default();

        let book = TradeBook::restore(trades, account, profit_rng(config)).unwrap_or_else(|e| {
            tracing::error!(error = %e, "stored trades rejected, starting a fresh book");
            TradeBook::new(config.initial_balance, profit_rng(config))
        });

        let mut quotes = QuoteBoard::new();
        let cache_prefix = simulated::cache_key("");
        match db::keys_with_prefix(&state.db, &cache_prefix) {
            Ok(keys) => {
                for key in keys {
                    if let Some(history) = restore_or_log::<Vec<Quote>>(state, &key) {
                        quotes.restore(key.trim_start_matches(&cache_prefix), history);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "quote cache unavailable"),
        }

        tracing::info!(
            trades = book.trades().len(),
            pending = book.pending_count(),
            orders = orders.len(),
            balance = book.account().balance,
            "engine state restored"
        );

        Self {
            engine_state: EngineState::Loading,
            book,
            ledger: BookingLedger::new(default_screens(), orders),
            quotes,
            scheduler: SettlementScheduler::new(state.engine_tx.clone(), config.settle_grace_secs),
            grace_secs: config.settle_grace_secs,
            quote_counter: 0,
        }
    }

    /// Settle anything that went overdue while we were down, then arm a
    /// deadline for every trade still pending.
    fn start(&mut self, now: DateTime<Utc>, state: &AppState, actions: &mut Actions) -> EngineResult<()> {
        let recovered = self.book.sweep_stuck(now, self.grace_secs);
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "settled overdue trades at startup");
            self.on_settled(&recovered, state, actions);
            self.persist_trades(actions)?;
        }

        for trade in self.book.pending() {
            self.scheduler.schedule(trade, now);
        }

        self.engine_state = EngineState::Running;
        actions.push(EngineAction::Broadcast(WsMessage::EngineStateMsg {
            state: "running".into(),
            reason: format!("{} pending trades armed", self.scheduler.len()),
        }));
        Ok(())
    }

    fn on_settled(&mut self, settled: &[Settlement], state: &AppState, actions: &mut Actions) {
        for s in settled {
            self.scheduler.cancel(&s.trade.id);
            state.counters.trades_settled.fetch_add(1, Ordering::Relaxed);
            actions.push(EngineAction::Broadcast(WsMessage::TradeSettled {
                trade_id: s.trade.id.clone(),
                symbol: s.trade.symbol.clone(),
                profit: s.profit,
                balance: s.balance_after,
                path: s.path,
                timestamp: s
                    .trade
                    .settled_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            }));
        }

        if !settled.is_empty() {
            actions.push(EngineAction::Broadcast(WsMessage::AccountUpdate {
                account: self.book.account().clone(),
            }));
        }
    }

    /// Trades and account go out as one batch so a settled trade is never
    /// stored without its balance credit.
    fn persist_trades(&self, actions: &mut Actions) -> EngineResult<()> {
        actions.push(EngineAction::DbWrite(DbCommand::PutBatch {
            entries: vec![
                (db::KEY_TRADES.into(), serde_json::to_string(self.book.trades())?),
                (db::KEY_ACCOUNT.into(), serde_json::to_string(self.book.account())?),
            ],
        }));
        Ok(())
    }

    fn persist_orders(&self, actions: &mut Actions) -> EngineResult<()> {
        actions.push(EngineAction::DbWrite(DbCommand::Put {
            key: db::KEY_ORDERS.into(),
            value: serde_json::to_string(self.ledger.orders())?,
        }));
        Ok(())
    }

    fn order_result(
        &mut self,
        result: EngineResult<Order>,
        actions: &mut Actions,
    ) -> EngineResult<EngineResult<Order>> {
        if let Ok(order) = &result {
            actions.push(EngineAction::Broadcast(WsMessage::OrderUpdate {
                order: order.clone(),
            }));
            self.persist_orders(actions)?;
        }
        Ok(result)
    }

    /// Final guard after every event: nothing stays pending past its deadline.
    fn sweep(&mut self, now: DateTime<Utc>, state: &AppState, actions: &mut Actions) -> EngineResult<()> {
        if self.engine_state != EngineState::Running {
            return Ok(());
        }
        let settled = self.book.sweep_stuck(now, self.grace_secs);
        if !settled.is_empty() {
            self.on_settled(&settled, state, actions);
            self.persist_trades(actions)?;
        }
        Ok(())
    }

    fn publish_snapshot(&self, state: &AppState) {
        let snapshot = EngineSnapshot {
            engine_state: self.engine_state,
            account: self.book.account().clone(),
            trades: self.book.trades().to_vec(),
            orders: self.ledger.orders().to_vec(),
            screens: self.ledger.screens().to_vec(),
            quotes: self.quotes.latest(),
            updated_at: Utc::now().to_rfc3339(),
        };
        let _ = state.snapshot_tx.send(snapshot);
    }
}

fn profit_rng(config: &AppConfig) -> StdRng {
    match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn restore_or_log<T: serde::de::DeserializeOwned>(state: &AppState, key: &str) -> Option<T> {
    match db::load_json(&state.db, key) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(key = key, error = %e, "stored value unreadable, starting empty");
            None
        }
    }
}

/// Core engine loop. Receives events, mutates state, emits actions.
/// Every mutation of trades, the account, or orders happens here, one event
/// at a time.
async fn run_engine(state: Arc<AppState>, config: AppConfig, mut rx: mpsc::Receiver<EngineEvent>) {
    tracing::info!("engine task started");

    let mut core = EngineCore::load(&state, &config);

    let mut actions = Actions::new();
    if let Err(e) = core.start(Utc::now(), &state, &mut actions) {
        tracing::error!(error = %e, "engine start failed");
    }
    core.publish_snapshot(&state);
    execute_actions(actions, &state).await;

    while let Some(event) = rx.recv().await {
        let mut actions = Actions::new();
        let result = process_event(event, &mut core, &state, &mut actions);

        // Only serialization can fail here; the event's mutation already
        // happened, so log and keep going.
        if let Err(e) = result {
            tracing::error!(error = %e, "engine error");
            state.counters.errors_recovered.fetch_add(1, Ordering::Relaxed);
        }

        execute_actions(actions, &state).await;
    }

    tracing::info!("engine task shutting down");
}

fn process_event(
    event: EngineEvent,
    core: &mut EngineCore,
    state: &Arc<AppState>,
    actions: &mut Actions,
) -> EngineResult<()> {
    let now = Utc::now();
    let running = core.engine_state == EngineState::Running;
    let mut reply: Option<Reply> = None;

    match event {
        EngineEvent::Tick => {
            state.counters.ticks_processed.fetch_add(1, Ordering::Relaxed);

            if !running || core.book.pending_count() == 0 {
                return Ok(());
            }

            let settled = core.book.tick(now);
            core.on_settled(&settled, state, actions);

            let pending: Vec<Countdown> = core
                .book
                .pending()
                .map(|t| Countdown {
                    id: t.id.clone(),
                    remaining_seconds: t.remaining_seconds,
                })
                .collect();
            if !pending.is_empty() {
                actions.push(EngineAction::Broadcast(WsMessage::TradeTick { pending }));
            }

            core.persist_trades(actions)?;
        }

        EngineEvent::SettleDue { trade_id } => {
            core.scheduler.fired(&trade_id);
            if !running {
                return Ok(());
            }

            match core.book.settle(&trade_id, now, paper::types::SettlePath::Deadline) {
                Some(settlement) => {
                    tracing::warn!(trade_id = %trade_id, "countdown missed deadline, settled by deadline task");
                    core.on_settled(std::slice::from_ref(&settlement), state, actions);
                    core.persist_trades(actions)?;
                }
                None => {
                    tracing::debug!(
                        trade_id = %trade_id,
                        known = core.book.get(&trade_id).is_some(),
                        "deadline fired for settled trade"
                    );
                }
            }
        }

        EngineEvent::Quote(quote) => {
            state.counters.quotes_received.fetch_add(1, Ordering::Relaxed);
            core.quote_counter += 1;

            actions.push(EngineAction::Broadcast(WsMessage::Quote {
                symbol: quote.symbol.clone(),
                price: quote.price,
                timestamp: quote.timestamp.to_rfc3339(),
            }));
            core.quotes.push(quote);

            if core.quote_counter % QUOTE_PERSIST_EVERY == 0 {
                let mut entries = Vec::with_capacity(simulated::SYMBOLS.len());
                for (symbol, _) in simulated::SYMBOLS {
                    entries.push((
                        simulated::cache_key(symbol),
                        serde_json::to_string(&core.quotes.history(symbol))?,
                    ));
                }
                actions.push(EngineAction::DbWrite(DbCommand::PutBatch { entries }));
            }
        }

        EngineEvent::PlaceTrade { request, reply: tx } => {
            let result = if running {
                let trade = core.book.place_trade(
                    &request.symbol,
                    request.side,
                    request.stake,
                    request.duration,
                    now,
                );
                core.scheduler.schedule(&trade, now);
                state.counters.trades_placed.fetch_add(1, Ordering::Relaxed);
                actions.push(EngineAction::Broadcast(WsMessage::TradePlaced {
                    trade: trade.clone(),
                }));
                core.persist_trades(actions)?;
                Ok(trade)
            } else {
                Err(halted(core.engine_state))
            };
            reply = Some(Reply::Trade(tx, result));
        }

        EngineEvent::CreateOrder { request, reply: tx } => {
            let result = if running {
                let r = core.ledger.create_order(request, now);
                if r.is_ok() {
                    state.counters.orders_created.fetch_add(1, Ordering::Relaxed);
                }
                core.order_result(r, actions)?
            } else {
                Err(halted(core.engine_state))
            };
            reply = Some(Reply::Order(tx, result));
        }

        EngineEvent::ConfirmOrder { order_id, reply: tx } => {
            let result = if running {
                let r = core.ledger.confirm_order(&order_id);
                core.order_result(r, actions)?
            } else {
                Err(halted(core.engine_state))
            };
            reply = Some(Reply::Order(tx, result));
        }

        EngineEvent::CancelOrder { order_id, reply: tx } => {
            let result = if running {
                let r = core.ledger.cancel_order(&order_id);
                core.order_result(r, actions)?
            } else {
                Err(halted(core.engine_state))
            };
            reply = Some(Reply::Order(tx, result));
        }

        EngineEvent::Shutdown => {
            tracing::info!("shutdown event received");
            core.engine_state = EngineState::Halted;
            actions.push(EngineAction::Broadcast(WsMessage::EngineStateMsg {
                state: "halted".into(),
                reason: "shutdown requested".into(),
            }));
        }
    }

    core.sweep(now, state, actions)?;
    core.publish_snapshot(state);

    if let Some(r) = reply {
        r.send();
    }

    Ok(())
}

fn halted(engine_state: EngineState) -> EngineError {
    EngineError::InvalidTransition(format!("engine is {engine_state}, not accepting requests"))
}

/// Execute engine actions (cold path -- involves channel sends)
async fn execute_actions(actions: Actions, state: &Arc<AppState>) {
    for action in actions {
        match action {
            EngineAction::Broadcast(msg) => {
                state.broadcast(msg);
            }
            EngineAction::DbWrite(cmd) => {
                if state.db_tx.send(cmd).await.is_err() {
                    tracing::error!("storage writer gone, write dropped");
                }
            }
        }
    }
}
