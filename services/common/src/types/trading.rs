//! Trading records: accounts, positions, orders and fills

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Direction, Offset, OrderStatus, PosSide, PriceType};

/// Substrings of a broker status message that mark a still-pending order as
/// effectively rejected.
pub const REJECT_KEYWORDS: &[&str] = &["rejected", "insufficient", "halt"];

/// Brokerage account snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountData {
    /// Account id
    pub account_id: String,
    /// Dynamic balance
    pub balance: f64,
    /// Available funds
    pub available: f64,
    /// Margin in use
    pub margin: f64,
    /// Balance at the previous settlement
    pub pre_balance: f64,
    /// Unrealized profit of open positions
    pub hold_profit: f64,
    /// Realized profit of closed positions
    pub close_profit: f64,
    /// Margin / balance
    pub risk_ratio: f64,
    /// Settlement currency
    pub currency: String,
    /// Broker display name
    pub broker_name: String,
    /// Whether the upstream gateway session is live
    pub gateway_connected: bool,
    /// Whether trading is administratively paused
    pub trade_paused: bool,
    /// Human-readable risk counter summary
    pub risk_status: String,
    /// Last mutation time
    pub update_time: DateTime<Utc>,
}

impl AccountData {
    /// An empty snapshot for an account that has not connected yet
    #[must_use]
    pub fn empty(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            balance: 0.0,
            available: 0.0,
            margin: 0.0,
            pre_balance: 0.0,
            hold_profit: 0.0,
            close_profit: 0.0,
            risk_ratio: 0.0,
            currency: "CNY".to_string(),
            broker_name: String::new(),
            gateway_connected: false,
            trade_paused: false,
            risk_status: String::new(),
            update_time: Utc::now(),
        }
    }
}

/// Position on one side of one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionData {
    /// Instrument code
    pub symbol: String,
    /// Exchange id
    pub exchange: String,
    /// Long or short side; both sides are tracked independently
    pub side: PosSide,
    /// Net lots on this side
    pub net_pos: i64,
    /// Lots carried over from yesterday
    pub yd_pos: i64,
    /// Lots opened today
    pub td_pos: i64,
    /// Average open price
    pub avg_price: f64,
    /// Unrealized profit
    pub hold_profit: f64,
    /// Margin held against this position
    pub margin: f64,
}

/// A single gateway-submitted child order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderData {
    /// Runtime order id
    pub order_id: String,
    /// Instrument code
    pub symbol: String,
    /// Exchange id
    pub exchange: String,
    /// Buy or sell
    pub direction: Direction,
    /// Open/close flag
    pub offset: Offset,
    /// Requested volume
    pub volume_original: i64,
    /// Filled volume so far; monotonically nondecreasing
    pub volume_traded: i64,
    /// Average traded price reported by the gateway
    pub traded_price: f64,
    /// Limit price; `None` means market
    pub price: Option<f64>,
    /// Price type
    pub price_type: PriceType,
    /// Order status
    pub status: OrderStatus,
    /// Broker status message
    pub status_msg: String,
    /// Upstream order id assigned by the gateway
    pub gateway_order_id: String,
    /// Submission time
    pub insert_time: DateTime<Utc>,
    /// Last mutation time
    pub update_time: DateTime<Utc>,
}

impl OrderData {
    /// Volume not yet filled
    #[must_use]
    pub const fn volume_left(&self) -> i64 {
        self.volume_original - self.volume_traded
    }

    /// An order is active until it reaches a terminal status
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Pending)
    }

    /// Whether the order is rejected, either by status or by a broker
    /// message whose wording marks a still-pending order as dead.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        if matches!(self.status, OrderStatus::Rejected) {
            return true;
        }
        if matches!(self.status, OrderStatus::Pending) {
            let msg = self.status_msg.to_ascii_lowercase();
            return REJECT_KEYWORDS.iter().any(|kw| msg.contains(kw));
        }
        false
    }
}

/// A single fill; append-only per order, many fills may reference one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeData {
    /// Fill id
    pub trade_id: String,
    /// Owning order id
    pub order_id: String,
    /// Instrument code
    pub symbol: String,
    /// Exchange id
    pub exchange: String,
    /// Buy or sell
    pub direction: Direction,
    /// Open/close flag
    pub offset: Offset,
    /// Fill price
    pub price: f64,
    /// Fill volume
    pub volume: i64,
    /// Fill time
    pub trade_time: DateTime<Utc>,
    /// Trading day (`YYYYMMDD`)
    pub trading_day: String,
    /// Commission charged
    pub commission: f64,
}

/// Child order submission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument code
    pub symbol: String,
    /// Buy or sell
    pub direction: Direction,
    /// Open/close flag
    pub offset: Offset,
    /// Requested volume
    pub volume: i64,
    /// Limit price; `None` means market
    pub price: Option<f64>,
}

/// Order cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Order id to cancel
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> OrderData {
        OrderData {
            order_id: "o1".to_string(),
            symbol: "rb2505".to_string(),
            exchange: "SHFE".to_string(),
            direction: Direction::Buy,
            offset: Offset::Open,
            volume_original: 10,
            volume_traded: 4,
            traded_price: 3500.0,
            price: Some(3500.0),
            price_type: PriceType::Limit,
            status: OrderStatus::Pending,
            status_msg: String::new(),
            gateway_order_id: "g1".to_string(),
            insert_time: Utc::now(),
            update_time: Utc::now(),
        }
    }

    #[test]
    fn test_volume_left() {
        let order = sample_order();
        assert_eq!(order.volume_left(), 6);
        assert!(order.is_active());
    }

    #[test]
    fn test_reject_keyword_scan() {
        let mut order = sample_order();
        assert!(!order.is_rejected());

        order.status_msg = "Insufficient margin for order".to_string();
        assert!(order.is_rejected());

        order.status_msg = "queueing".to_string();
        assert!(!order.is_rejected());

        order.status = OrderStatus::Rejected;
        assert!(order.is_rejected());

        // Terminal finished orders are never reclassified
        order.status = OrderStatus::Finished;
        order.status_msg = "trading halt".to_string();
        assert!(!order.is_rejected());
    }
}
