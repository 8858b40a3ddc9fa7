use crate::booking::catalog::Screen;
use crate::errors::{EngineError, EngineResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub screen_id: String,
    pub display_date: NaiveDate,
    pub customer_name: String,
    pub customer_email: String,
    pub ad_title: String,
    pub amount: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Validated booking request.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub screen_id: String,
    pub display_date: NaiveDate,
    pub customer_name: String,
    pub customer_email: String,
    pub ad_title: String,
}

/// Per-screen, per-date slot bookkeeping. Orders are kept in insertion order.
///
/// Availability is check-then-act; that is only sound because a single
/// engine task owns the ledger.
pub struct BookingLedger {
    screens: Vec<Screen>,
    orders: Vec<Order>,
}

impl BookingLedger {
    pub fn new(screens: Vec<Screen>, orders: Vec<Order>) -> Self {
        Self { screens, orders }
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn screen(&self, screen_id: &str) -> Option<&Screen> {
        self.screens.iter().find(|s| s.id == screen_id)
    }

    /// Free slots for a screen on a date. Unknown screens have none.
    pub fn available_inventory(&self, screen_id: &str, date: NaiveDate) -> u32 {
        match self.screen(screen_id) {
            Some(screen) => available_inventory(screen, &self.orders, date),
            None => 0,
        }
    }

    pub fn create_order(&mut self, request: OrderRequest, now: DateTime<Utc>) -> EngineResult<Order> {
        let screen = self
            .screen(&request.screen_id)
            .ok_or_else(|| EngineError::UnknownScreen(request.screen_id.clone()))?;

        if available_inventory(screen, &self.orders, request.display_date) == 0 {
            tracing::info!(
                screen_id = %request.screen_id,
                date = %request.display_date,
                "booking rejected, no slots left"
            );
            return Err(EngineError::SoldOut {
                screen_id: request.screen_id,
                date: request.display_date.to_string(),
            });
        }

        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            screen_id: request.screen_id,
            display_date: request.display_date,
            customer_name: request.customer_name,
            customer_email: request.customer_email,
            ad_title: request.ad_title,
            amount: screen.price_per_day,
            status: OrderStatus::Pending,
            created_at: now,
        };

        tracing::info!(
            order_id = %order.id,
            screen_id = %order.screen_id,
            date = %order.display_date,
            amount = order.amount,
            "order created"
        );

        self.orders.push(order.clone());
        Ok(order)
    }

    /// Mark a pending order as paid.
    pub fn confirm_order(&mut self, order_id: &str) -> EngineResult<Order> {
        let order = self.order_mut(order_id)?;
        match order.status {
            OrderStatus::Pending => {
                order.status = OrderStatus::Confirmed;
                tracing::info!(order_id = %order.id, "order confirmed");
                Ok(order.clone())
            }
            OrderStatus::Confirmed => Ok(order.clone()),
            OrderStatus::Cancelled => Err(EngineError::InvalidTransition(format!(
                "order {order_id} is cancelled"
            ))),
        }
    }

    /// Cancel an order; its slot is free again immediately.
    pub fn cancel_order(&mut self, order_id: &str) -> EngineResult<Order> {
        let order = self.order_mut(order_id)?;
        if order.status != OrderStatus::Cancelled {
            tracing::info!(order_id = %order.id, previous = %order.status, "order cancelled");
            order.status = OrderStatus::Cancelled;
        }
        Ok(order.clone())
    }

    fn order_mut(&mut self, order_id: &str) -> EngineResult<&mut Order> {
        self.orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
    }
}

/// capacity - live bookings for the screen/date, floored at zero.
pub fn available_inventory(screen: &Screen, orders: &[Order], date: NaiveDate) -> u32 {
    let booked = orders
        .iter()
        .filter(|o| {
            o.screen_id == screen.id && o.display_date == date && o.status != OrderStatus::Cancelled
        })
        .count();

    screen.daily_capacity.saturating_sub(booked as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::catalog::default_screens;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn request(screen_id: &str, d: &str) -> OrderRequest {
        OrderRequest {
            screen_id: screen_id.into(),
            display_date: date(d),
            customer_name: "Dana".into(),
            customer_email: "dana@example.com".into(),
            ad_title: "Spring Sale".into(),
        }
    }

    fn ledger() -> BookingLedger {
        BookingLedger::new(default_screens(), Vec::new())
    }

    #[test]
    fn test_booking_to_capacity_then_sold_out() {
        let mut l = ledger();
        // scr-005 has 4 slots
        for _ in 0..4 {
            l.create_order(request("scr-005", "2026-03-01"), Utc::now()).unwrap();
        }
        assert_eq!(l.available_inventory("scr-005", date("2026-03-01")), 0);

        let err = l.create_order(request("scr-005", "2026-03-01"), Utc::now());
        assert!(matches!(err, Err(EngineError::SoldOut { .. })));
        // other dates unaffected
        assert_eq!(l.available_inventory("scr-005", date("2026-03-02")), 4);
    }

    #[test]
    fn test_cancel_frees_exactly_one_slot() {
        let mut l = ledger();
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(l.create_order(request("scr-005", "2026-03-01"), Utc::now()).unwrap().id);
        }
        let before = l.available_inventory("scr-005", date("2026-03-01"));
        l.cancel_order(&ids[2]).unwrap();
        let after = l.available_inventory("scr-005", date("2026-03-01"));
        assert_eq!(after, before + 1);

        // cancelling again changes nothing
        l.cancel_order(&ids[2]).unwrap();
        assert_eq!(l.available_inventory("scr-005", date("2026-03-01")), after);

        // freed slot can be rebooked
        assert!(l.create_order(request("scr-005", "2026-03-01"), Utc::now()).is_ok());
        assert_eq!(l.available_inventory("scr-005", date("2026-03-01")), 0);
    }

    #[test]
    fn test_inventory_never_negative_under_mixed_sequence() {
        let mut l = ledger();
        let mut live = Vec::new();
        for i in 0..40 {
            match l.create_order(request("scr-006", "2026-04-10"), Utc::now()) {
                Ok(o) => live.push(o.id),
                Err(EngineError::SoldOut { .. }) => {}
                Err(e) => panic!("unexpected error {e}"),
            }
            if i % 3 == 0 {
                if let Some(id) = live.pop() {
                    l.cancel_order(&id).unwrap();
                }
            }
            let avail = l.available_inventory("scr-006", date("2026-04-10"));
            assert!(avail <= 5);
            assert_eq!(avail as usize, 5 - live.len());
        }
    }

    #[test]
    fn test_unknown_screen() {
        let mut l = ledger();
        assert_eq!(l.available_inventory("nope", date("2026-03-01")), 0);
        assert!(matches!(
            l.create_order(request("nope", "2026-03-01"), Utc::now()),
            Err(EngineError::UnknownScreen(_))
        ));
    }

    #[test]
    fn test_confirm_and_cancel_transitions() {
        let mut l = ledger();
        let o = l.create_order(request("scr-001", "2026-05-05"), Utc::now()).unwrap();
        assert_eq!(o.amount, 450.0);
        assert_eq!(l.confirm_order(&o.id).unwrap().status, OrderStatus::Confirmed);
        assert_eq!(l.cancel_order(&o.id).unwrap().status, OrderStatus::Cancelled);
        assert!(matches!(l.confirm_order(&o.id), Err(EngineError::InvalidTransition(_))));
        assert!(matches!(l.cancel_order("missing"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_confirmed_orders_still_hold_slots() {
        let mut l = ledger();
        let o = l.create_order(request("scr-002", "2026-06-01"), Utc::now()).unwrap();
        l.confirm_order(&o.id).unwrap();
        assert_eq!(l.available_inventory("scr-002", date("2026-06-01")), 5);
        assert_eq!(l.orders().len(), 1);
    }
}
