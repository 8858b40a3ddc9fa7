use crate::errors::{EngineError, EngineResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub initial_balance: f64,
    /// Extra seconds past a trade's duration before the deadline path force-settles it
    pub settle_grace_secs: u64,
    pub quote_interval_ms: u64,
    pub storage_quota_bytes: usize,
    pub data_dir: PathBuf,
    pub server_port: u16,
    /// Fixed seed for the profit generator; entropy when unset
    pub rng_seed: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            settle_grace_secs: 5,
            quote_interval_ms: 1_000,
            storage_quota_bytes: 5 * 1024 * 1024,
            data_dir: PathBuf::from("data"),
            server_port: 3001,
            rng_seed: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let initial_balance = env_var_or("INITIAL_BALANCE", "10000")
            .parse::<f64>()
            .map_err(|e| EngineError::Config(format!("INITIAL_BALANCE: {e}")))?;

        if !initial_balance.is_finite() || initial_balance < 0.0 {
            return Err(EngineError::Config(format!(
                "INITIAL_BALANCE must be a non-negative number, got {initial_balance}"
            )));
        }

        let settle_grace_secs = env_var_or("SETTLE_GRACE_SECS", "5")
            .parse::<u64>()
            .map_err(|e| EngineError::Config(format!("SETTLE_GRACE_SECS: {e}")))?;

        let quote_interval_ms = env_var_or("QUOTE_INTERVAL_MS", "1000")
            .parse::<u64>()
            .map_err(|e| EngineError::Config(format!("QUOTE_INTERVAL_MS: {e}")))?
            .max(50);

        let storage_quota_bytes = env_var_or("STORAGE_QUOTA_BYTES", "5242880")
            .parse::<usize>()
            .map_err(|e| EngineError::Config(format!("STORAGE_QUOTA_BYTES: {e}")))?;

        let server_port = env_var_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| EngineError::Config(format!("SERVER_PORT: {e}")))?;

        let rng_seed = match std::env::var("RNG_SEED") {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|e| EngineError::Config(format!("RNG_SEED: {e}")))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            initial_balance,
            settle_grace_secs,
            quote_interval_ms,
            storage_quota_bytes,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port,
            rng_seed,
        })
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
