use crate::state::EngineEvent;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::mpsc;

/// Tradable symbols and their opening prices.
pub const SYMBOLS: [(&str, f64); 6] = [
    ("EUR/USD", 1.0850),
    ("GBP/USD", 1.2700),
    ("USD/JPY", 151.20),
    ("BTC/USD", 67_000.0),
    ("ETH/USD", 3_500.0),
    ("XAU/USD", 2_350.0),
];

/// Max relative move per step (0.05%)
const MAX_STEP: f64 = 0.0005;
/// Points of history kept per symbol
pub const HISTORY_LEN: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Display-only price generator. Outcomes never read from it.
pub struct RandomWalk {
    prices: Vec<(&'static str, f64)>,
    rng: StdRng,
}

impl RandomWalk {
    pub fn new(rng: StdRng) -> Self {
        Self {
            prices: SYMBOLS.to_vec(),
            rng,
        }
    }

    pub fn step(&mut self, now: DateTime<Utc>) -> Vec<Quote> {
        self.prices
            .iter_mut()
            .map(|(symbol, price)| {
                let change = self.rng.gen_range(-MAX_STEP..=MAX_STEP);
                *price *= 1.0 + change;
                Quote {
                    symbol: symbol.to_string(),
                    price: *price,
                    timestamp: now,
                }
            })
            .collect()
    }
}

/// Emits one quote per symbol every interval until the engine goes away.
pub async fn run_quote_feed(interval_ms: u64, rng: StdRng, engine_tx: mpsc::Sender<EngineEvent>) {
    tracing::info!(symbols = SYMBOLS.len(), interval_ms, "simulated quote feed started");

    let mut walk = RandomWalk::new(rng);
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        for quote in walk.step(Utc::now()) {
            if engine_tx.send(EngineEvent::Quote(quote)).await.is_err() {
                tracing::error!("engine channel closed, quote feed shutting down");
                return;
            }
        }
    }
}

/// Rolling per-symbol price history.
#[derive(Debug, Default)]
pub struct QuoteBoard {
    history: BTreeMap<String, VecDeque<Quote>>,
}

impl QuoteBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(&mut self, symbol: &str, quotes: Vec<Quote>) {
        let mut buf: VecDeque<Quote> = quotes.into_iter().collect();
        while buf.len() > HISTORY_LEN {
            buf.pop_front();
        }
        self.history.insert(symbol.to_string(), buf);
    }

    pub fn push(&mut self, quote: Quote) {
        let buf = self
            .history
            .entry(quote.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(HISTORY_LEN));
        if buf.len() >= HISTORY_LEN {
            buf.pop_front();
        }
        buf.push_back(quote);
    }

    /// Latest quote per symbol, ordered by symbol.
    pub fn latest(&self) -> Vec<Quote> {
        self.history
            .values()
            .filter_map(|buf| buf.back().cloned())
            .collect()
    }

    pub fn history(&self, symbol: &str) -> Vec<Quote> {
        self.history
            .get(symbol)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Storage key for a symbol's cached history.
pub fn cache_key(symbol: &str) -> String {
    format!("cache:quotes:{symbol}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_walk_moves_within_step_bound() {
        let mut walk = RandomWalk::new(StdRng::seed_from_u64(11));
        let mut prev: Vec<f64> = SYMBOLS.iter().map(|(_, p)| *p).collect();
        for _ in 0..1_000 {
            let quotes = walk.step(Utc::now());
            assert_eq!(quotes.len(), SYMBOLS.len());
            for (q, p) in quotes.iter().zip(prev.iter()) {
                let rel = (q.price - p).abs() / p;
                assert!(rel <= MAX_STEP + 1e-12);
                assert!(q.price > 0.0);
            }
            prev = quotes.iter().map(|q| q.price).collect();
        }
    }

    #[test]
    fn test_board_caps_history() {
        let mut board = QuoteBoard::new();
        for i in 0..(HISTORY_LEN + 50) {
            board.push(Quote {
                symbol: "EUR/USD".into(),
                price: i as f64,
                timestamp: Utc::now(),
            });
        }
        let hist = board.history("EUR/USD");
        assert_eq!(hist.len(), HISTORY_LEN);
        assert_eq!(hist[0].price, 50.0);
        assert_eq!(board.latest()[0].price, (HISTORY_LEN + 49) as f64);
        assert!(board.history("GBP/USD").is_empty());
    }
}
