//! Trade summary computation.
//! All functions are pure -- they take state and return computed values.

use crate::paper::types::{Account, Outcome, Trade};

/// Aggregate view of the trade list. Used by REST endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TradeSummary {
    pub total_trades: usize,
    pub pending_trades: usize,
    pub completed_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub total_staked: f64,
    pub total_profit: f64,
    pub balance: f64,
    pub return_on_initial: f64,
}

/// Compute the summary from the trade list and account. Pure function.
pub fn compute_summary(trades: &[Trade], account: &Account) -> TradeSummary {
    let pending_trades = trades.iter().filter(|t| t.is_pending()).count();
    let completed: Vec<&Trade> = trades.iter().filter(|t| !t.is_pending()).collect();
    let winning_trades = completed
        .iter()
        .filter(|t| t.outcome == Some(Outcome::Win))
        .count();

    let win_rate = if completed.is_empty() {
        0.0
    } else {
        winning_trades as f64 / completed.len() as f64
    };

    let return_on_initial = if account.initial_balance > 0.0 {
        (account.balance - account.initial_balance) / account.initial_balance
    } else {
        0.0
    };

    TradeSummary {
        total_trades: trades.len(),
        pending_trades,
        completed_trades: completed.len(),
        winning_trades,
        win_rate,
        total_staked: trades.iter().map(|t| t.stake).sum(),
        total_profit: completed.iter().filter_map(|t| t.profit).sum(),
        balance: account.balance,
        return_on_initial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::simulator::TradeBook;
    use crate::paper::types::{SettlePath, Side, TradeDuration};
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_empty_book() {
        let summary = compute_summary(&[], &Account::new(1_000.0));
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.balance, 1_000.0);
    }

    #[test]
    fn test_mixed_pending_and_completed() {
        let mut book = TradeBook::new(1_000.0, StdRng::seed_from_u64(3));
        let now = Utc::now();
        let a = book.place_trade("EUR/USD", Side::Buy, 100.0, TradeDuration::Secs30, now);
        book.place_trade("EUR/USD", Side::Sell, 50.0, TradeDuration::Min1, now);
        book.settle(&a.id, now, SettlePath::Countdown);

        let summary = compute_summary(book.trades(), book.account());
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.pending_trades, 1);
        assert_eq!(summary.completed_trades, 1);
        assert_eq!(summary.win_rate, 1.0);
        assert_eq!(summary.total_staked, 150.0);
        assert_eq!(summary.total_profit, book.account().realized_profit);
        assert!(summary.return_on_initial > 0.0);
    }
}
