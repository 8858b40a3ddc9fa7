use crate::booking::ledger::OrderRequest;
use crate::errors::{EngineError, EngineResult};
use crate::paper::types::{Side, TradeDuration};
use crate::state::TradeRequest;
use chrono::NaiveDate;

/// Smallest accepted stake
pub const MIN_STAKE: f64 = 10.0;
/// Largest accepted stake
pub const MAX_STAKE: f64 = 10_000.0;
/// Longest accepted free-text field
const MAX_TEXT_LEN: usize = 200;

/// Input check result
#[derive(Debug, Clone)]
pub enum RequestCheck<T> {
    /// Request accepted, normalized
    Allowed(T),
    /// Rejected with reason
    Blocked(String),
}

impl<T> RequestCheck<T> {
    #[cfg(test)]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RequestCheck::Allowed(_))
    }

    /// Blocked requests become `InvalidInput` (HTTP 400).
    pub fn into_result(self) -> EngineResult<T> {
        match self {
            RequestCheck::Allowed(v) => Ok(v),
            RequestCheck::Blocked(reason) => Err(EngineError::InvalidInput(reason)),
        }
    }
}

/// Validate a trade request before it reaches the engine.
/// Pure function, no side effects.
pub fn check_trade_request(
    symbol: &str,
    side: &str,
    stake: f64,
    duration_seconds: u32,
) -> RequestCheck<TradeRequest> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return RequestCheck::Blocked("symbol is required".into());
    }
    if symbol.len() > 32 {
        return RequestCheck::Blocked("symbol too long".into());
    }

    let side: Side = match side.parse() {
        Ok(s) => s,
        Err(e) => return RequestCheck::Blocked(e.to_string()),
    };

    if !stake.is_finite() {
        return RequestCheck::Blocked("stake must be a number".into());
    }
    if !(MIN_STAKE..=MAX_STAKE).contains(&stake) {
        return RequestCheck::Blocked(format!(
            "stake must be between {MIN_STAKE} and {MAX_STAKE}, got {stake}"
        ));
    }

    let duration = match TradeDuration::try_from(duration_seconds) {
        Ok(d) => d,
        Err(e) => return RequestCheck::Blocked(e.to_string()),
    };

    RequestCheck::Allowed(TradeRequest {
        symbol: symbol.to_uppercase(),
        side,
        stake,
        duration,
    })
}

/// Validate a booking request before it reaches the engine.
pub fn check_order_request(
    screen_id: &str,
    display_date: &str,
    customer_name: &str,
    customer_email: &str,
    ad_title: &str,
) -> RequestCheck<OrderRequest> {
    let screen_id = screen_id.trim();
    if screen_id.is_empty() {
        return RequestCheck::Blocked("screen_id is required".into());
    }

    let date = match NaiveDate::parse_from_str(display_date.trim(), "%Y-%m-%d") {
        Ok(d) => d,
        Err(_) => {
            return RequestCheck::Blocked(format!("display_date must be YYYY-MM-DD, got {display_date}"))
        }
    };

    let name = customer_name.trim();
    let title = ad_title.trim();
    let email = customer_email.trim();

    if name.is_empty() || title.is_empty() {
        return RequestCheck::Blocked("customer_name and ad_title are required".into());
    }
    if name.len() > MAX_TEXT_LEN || title.len() > MAX_TEXT_LEN || email.len() > MAX_TEXT_LEN {
        return RequestCheck::Blocked("field too long".into());
    }

    let valid_email = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid_email {
        return RequestCheck::Blocked(format!("invalid email: {email}"));
    }

    RequestCheck::Allowed(OrderRequest {
        screen_id: screen_id.to_string(),
        display_date: date,
        customer_name: name.to_string(),
        customer_email: email.to_string(),
        ad_title: title.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_check_is_invalid_input() {
        match check_trade_request("EUR/USD", "buy", 5.0, 30).into_result() {
            Err(EngineError::InvalidInput(reason)) => assert!(reason.contains("stake")),
            other => panic!("expected invalid input, got {other:?}"),
        }
        let req = check_trade_request("btc/usd", "sell", 20.0, 60).into_result().unwrap();
        assert_eq!(req.symbol, "BTC/USD");
    }

    #[test]
    fn test_normal_trade_allowed() {
        let check = check_trade_request("eur/usd", "buy", 100.0, 30);
        match check {
            RequestCheck::Allowed(req) => {
                assert_eq!(req.symbol, "EUR/USD");
                assert_eq!(req.duration, TradeDuration::Secs30);
            }
            RequestCheck::Blocked(r) => panic!("blocked: {r}"),
        }
    }

    #[test]
    fn test_stake_bounds() {
        assert!(check_trade_request("EUR/USD", "buy", 10.0, 60).is_allowed());
        assert!(check_trade_request("EUR/USD", "buy", 10_000.0, 60).is_allowed());
        assert!(!check_trade_request("EUR/USD", "buy", 9.99, 60).is_allowed());
        assert!(!check_trade_request("EUR/USD", "buy", 10_000.01, 60).is_allowed());
        assert!(!check_trade_request("EUR/USD", "buy", f64::NAN, 60).is_allowed());
        assert!(!check_trade_request("EUR/USD", "buy", -50.0, 60).is_allowed());
    }

    #[test]
    fn test_duration_and_symbol_rejections() {
        assert!(!check_trade_request("EUR/USD", "sell", 100.0, 45).is_allowed());
        assert!(!check_trade_request("   ", "sell", 100.0, 60).is_allowed());
        assert!(!check_trade_request("EUR/USD", "hold", 100.0, 60).is_allowed());
    }

    #[test]
    fn test_order_request_validation() {
        assert!(check_order_request("scr-001", "2026-03-01", "Dana", "dana@example.com", "Sale").is_allowed());
        assert!(!check_order_request("scr-001", "03/01/2026", "Dana", "dana@example.com", "Sale").is_allowed());
        assert!(!check_order_request("scr-001", "2026-03-01", "", "dana@example.com", "Sale").is_allowed());
        assert!(!check_order_request("scr-001", "2026-03-01", "Dana", "dana.example.com", "Sale").is_allowed());
        assert!(!check_order_request("", "2026-03-01", "Dana", "dana@example.com", "Sale").is_allowed());
    }
}
