use crate::errors::{EngineError, EngineResult};
use crate::paper::types::*;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use smallvec::SmallVec;

// ═══════════════════════════════════════════════════════════════════════════════
// TRADE SETTLEMENT SIMULATOR
//
// Every trade is pending for its full duration and then resolves as a win.
// Profit is drawn uniformly from [0.7, 1.3) x stake and credited to the
// account balance at the moment of settlement.
//
// Three paths converge on `settle`: the per-second countdown, the per-trade
// deadline task, and the sweep guard. `settle` is the only place that flips
// status or touches the balance, and it is a no-op for anything not pending.
// ═══════════════════════════════════════════════════════════════════════════════

/// Lower bound of the profit multiplier (inclusive)
const PROFIT_MIN_MULT: f64 = 0.7;
/// Upper bound of the profit multiplier (exclusive)
const PROFIT_MAX_MULT: f64 = 1.3;

pub type Settlements = SmallVec<[Settlement; 4]>;

/// Owns the trade list and the account. All mutations go through here.
pub struct TradeBook {
    /// Newest first
    trades: Vec<Trade>,
    account: Account,
    rng: StdRng,
}

impl TradeBook {
    pub fn new(initial_balance: f64, rng: StdRng) -> Self {
        Self {
            trades: Vec::new(),
            account: Account::new(initial_balance),
            rng,
        }
    }

    /// Rebuild from persisted state. Completed trades missing their outcome
    /// fields mean the stored list cannot be trusted.
    pub fn restore(trades: Vec<Trade>, account: Account, rng: StdRng) -> EngineResult<Self> {
        for t in &trades {
            if t.status == TradeStatus::Completed && (t.profit.is_none() || t.outcome.is_none()) {
                return Err(EngineError::StateCorruption(format!(
                    "completed trade {} has no profit/outcome",
                    t.id
                )));
            }
            if t.is_pending() && t.remaining_seconds > t.duration_seconds.seconds() {
                return Err(EngineError::StateCorruption(format!(
                    "trade {} countdown {} exceeds duration {}",
                    t.id,
                    t.remaining_seconds,
                    t.duration_seconds.seconds()
                )));
            }
        }

        Ok(Self { trades, account, rng })
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn get(&self, trade_id: &str) -> Option<&Trade> {
        self.trades.iter().find(|t| t.id == trade_id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| t.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Create a pending trade and prepend it. Stake and duration are taken as
    /// given; range checks happen before a request reaches the book.
    pub fn place_trade(
        &mut self,
        symbol: &str,
        side: Side,
        stake: f64,
        duration: TradeDuration,
        now: DateTime<Utc>,
    ) -> Trade {
        let trade = Trade {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            stake,
            duration_seconds: duration,
            created_at: now,
            status: TradeStatus::Pending,
            outcome: None,
            profit: None,
            remaining_seconds: duration.seconds(),
            settled_at: None,
            settled_by: None,
        };

        tracing::info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            side = %side,
            stake = stake,
            duration = duration.seconds(),
            "trade placed"
        );

        self.trades.insert(0, trade.clone());
        trade
    }

    /// Advance every pending countdown by one second. A countdown that hits
    /// zero is settled in the same tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Settlements {
        let mut settled = Settlements::new();

        for idx in 0..self.trades.len() {
            let trade = &mut self.trades[idx];
            if !trade.is_pending() || trade.remaining_seconds == 0 {
                continue;
            }

            trade.remaining_seconds -= 1;
            if trade.remaining_seconds == 0 {
                if let Some(s) = self.settle_at(idx, now, SettlePath::Countdown) {
                    settled.push(s);
                }
            }
        }

        settled
    }

    /// Settle one trade by id. Returns `None` when the trade is unknown or
    /// already completed, in which case nothing changes.
    pub fn settle(
        &mut self,
        trade_id: &str,
        now: DateTime<Utc>,
        path: SettlePath,
    ) -> Option<Settlement> {
        let idx = self.trades.iter().position(|t| t.id == trade_id)?;
        self.settle_at(idx, now, path)
    }

    /// Force-settle pending trades whose countdown is exhausted or whose age
    /// is past duration + grace.
    pub fn sweep_stuck(&mut self, now: DateTime<Utc>, grace_secs: u64) -> Settlements {
        let mut settled = Settlements::new();

        for idx in 0..self.trades.len() {
            let trade = &self.trades[idx];
            if !trade.is_pending() {
                continue;
            }

            let overdue = trade.age_secs(now)
                > i64::from(trade.duration_seconds.seconds()) + grace_secs as i64;

            if trade.remaining_seconds == 0 || overdue {
                tracing::warn!(
                    trade_id = %trade.id,
                    remaining = trade.remaining_seconds,
                    age = trade.age_secs(now),
                    "force-settling stuck trade"
                );
                if let Some(s) = self.settle_at(idx, now, SettlePath::Sweep) {
                    settled.push(s);
                }
            }
        }

        settled
    }

    fn settle_at(&mut self, idx: usize, now: DateTime<Utc>, path: SettlePath) -> Option<Settlement> {
        let trade = &mut self.trades[idx];
        if !trade.is_pending() {
            return None;
        }

        let profit = trade.stake * self.rng.gen_range(PROFIT_MIN_MULT..PROFIT_MAX_MULT);

        trade.status = TradeStatus::Completed;
        trade.outcome = Some(Outcome::Win);
        trade.profit = Some(profit);
        trade.remaining_seconds = 0;
        trade.settled_at = Some(now);
        trade.settled_by = Some(path);

        self.account.balance += profit;
        self.account.realized_profit += profit;
        self.account.settled_trades += 1;

        tracing::info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            profit = profit,
            balance = self.account.balance,
            path = %path,
            "trade settled"
        );

        Some(Settlement {
            trade: trade.clone(),
            profit,
            balance_after: self.account.balance,
            path,
        })
    }
}
