use crate::paper::types::Trade;
use crate::state::EngineEvent;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// One deferred task per pending trade, keyed by trade id.
/// Each task sleeps until `created_at + duration + grace` and then asks the
/// engine to settle the trade. Tasks for trades that settle by countdown are
/// aborted; a task that fires late is harmless because settlement is guarded.
pub struct SettlementScheduler {
    tasks: HashMap<String, AbortHandle>,
    engine_tx: mpsc::Sender<EngineEvent>,
    grace_secs: u64,
}

impl SettlementScheduler {
    pub fn new(engine_tx: mpsc::Sender<EngineEvent>, grace_secs: u64) -> Self {
        Self {
            tasks: HashMap::new(),
            engine_tx,
            grace_secs,
        }
    }

    pub fn schedule(&mut self, trade: &Trade, now: DateTime<Utc>) {
        let delay = (trade.deadline(self.grace_secs) - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        let tx = self.engine_tx.clone();
        let trade_id = trade.id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(EngineEvent::SettleDue { trade_id }).await.is_err() {
                tracing::debug!("engine channel closed before settlement deadline");
            }
        });

        tracing::debug!(trade_id = %trade.id, delay_ms = delay.as_millis() as u64, "settlement deadline scheduled");

        if let Some(previous) = self.tasks.insert(trade.id.clone(), handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Abort the deadline task for a trade that settled some other way.
    pub fn cancel(&mut self, trade_id: &str) -> bool {
        match self.tasks.remove(trade_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget a task that already fired.
    pub fn fired(&mut self, trade_id: &str) {
        self.tasks.remove(trade_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for SettlementScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::types::{Side, TradeDuration, TradeStatus};
    use std::time::Duration;

    fn trade(id: &str, created_at: DateTime<Utc>) -> Trade {
        Trade {
            id: id.into(),
            symbol: "EUR/USD".into(),
            side: Side::Buy,
            stake: 100.0,
            duration_seconds: TradeDuration::Secs30,
            created_at,
            status: TradeStatus::Pending,
            outcome: None,
            profit: None,
            remaining_seconds: 30,
            settled_at: None,
            settled_by: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_duration_plus_grace() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sched = SettlementScheduler::new(tx, 5);
        let now = Utc::now();
        sched.schedule(&trade("t1", now), now);

        let early = tokio::time::timeout(Duration::from_secs(34), rx.recv()).await;
        assert!(early.is_err(), "fired before deadline");

        let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("deadline should fire")
            .expect("channel open");
        match ev {
            EngineEvent::SettleDue { trade_id } => assert_eq!(trade_id, "t1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_fires() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sched = SettlementScheduler::new(tx, 5);
        let now = Utc::now();
        sched.schedule(&trade("t1", now), now);
        assert!(sched.cancel("t1"));
        assert!(!sched.cancel("t1"));
        assert_eq!(sched.len(), 0);

        let res = tokio::time::timeout(Duration::from_secs(120), rx.recv()).await;
        assert!(res.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_trade_fires_immediately() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sched = SettlementScheduler::new(tx, 5);
        let now = Utc::now();
        let old = trade("old", now - chrono::Duration::seconds(300));
        sched.schedule(&old, now);

        let ev = tokio::time::timeout(Duration::from_millis(10), rx.recv()).await;
        assert!(matches!(ev, Ok(Some(EngineEvent::SettleDue { .. }))));
    }
}
