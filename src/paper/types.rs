use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "up" | "call" => Ok(Self::Buy),
            "sell" | "down" | "put" => Ok(Self::Sell),
            other => Err(EngineError::InvalidInput(format!("unknown side: {other}"))),
        }
    }
}

/// Expiry choices offered to the user. Serialized as the number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum TradeDuration {
    Secs30,
    Min1,
    Min2,
    Min5,
    Min10,
}

impl TradeDuration {
    pub const ALL: [TradeDuration; 5] = [
        Self::Secs30,
        Self::Min1,
        Self::Min2,
        Self::Min5,
        Self::Min10,
    ];

    #[inline]
    pub fn seconds(self) -> u32 {
        match self {
            Self::Secs30 => 30,
            Self::Min1 => 60,
            Self::Min2 => 120,
            Self::Min5 => 300,
            Self::Min10 => 600,
        }
    }
}

impl TryFrom<u32> for TradeDuration {
    type Error = EngineError;

    fn try_from(secs: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|d| d.seconds() == secs)
            .ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "duration must be one of 30, 60, 120, 300, 600 seconds, got {secs}"
                ))
            })
    }
}

impl From<TradeDuration> for u32 {
    fn from(d: TradeDuration) -> Self {
        d.seconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    /// Part of the record format; the simulator never produces it.
    #[allow(dead_code)]
    Loss,
}

/// Which path settled a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlePath {
    /// Per-second countdown reached zero
    Countdown,
    /// Deferred per-trade task fired at created_at + duration + grace
    Deadline,
    /// Synchronous guard run after state changes and at startup
    Sweep,
}

impl std::fmt::Display for SettlePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Countdown => write!(f, "countdown"),
            Self::Deadline => write!(f, "deadline"),
            Self::Sweep => write!(f, "sweep"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub stake: f64,
    pub duration_seconds: TradeDuration,
    pub created_at: DateTime<Utc>,
    pub status: TradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit: Option<f64>,
    pub remaining_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_by: Option<SettlePath>,
}

impl Trade {
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == TradeStatus::Pending
    }

    /// Instant after which the trade counts as stuck.
    pub fn deadline(&self, grace_secs: u64) -> DateTime<Utc> {
        let secs = i64::from(self.duration_seconds.seconds()) + grace_secs as i64;
        self.created_at + chrono::Duration::seconds(secs)
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: f64,
    pub initial_balance: f64,
    pub realized_profit: f64,
    pub settled_trades: u64,
}

impl Account {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            initial_balance,
            realized_profit: 0.0,
            settled_trades: 0,
        }
    }
}

/// Result of a single successful settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub trade: Trade,
    pub profit: f64,
    pub balance_after: f64,
    pub path: SettlePath,
}
