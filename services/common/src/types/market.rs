//! Market data records: ticks, bars and contract reference data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Interval;

/// Market snapshot for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickData {
    /// Instrument code
    pub symbol: String,
    /// Exchange id
    pub exchange: String,
    /// Snapshot timestamp
    pub timestamp: DateTime<Utc>,
    /// Last traded price
    pub last_price: f64,
    /// Best bid price
    pub bid1: f64,
    /// Best ask price
    pub ask1: f64,
    /// Best bid volume
    pub bid_vol1: i64,
    /// Best ask volume
    pub ask_vol1: i64,
    /// Volume traded since the previous snapshot
    pub volume: i64,
    /// Turnover since the previous snapshot
    pub turnover: f64,
    /// Open interest
    pub open_interest: f64,
    /// Session open
    pub open: f64,
    /// Session high
    pub high: f64,
    /// Session low
    pub low: f64,
    /// Previous session close
    pub pre_close: f64,
    /// Upper price limit
    pub limit_up: f64,
    /// Lower price limit
    pub limit_down: f64,
}

impl TickData {
    /// Canonical `"<instrument>.<exchange>"` routing key
    #[must_use]
    pub fn std_symbol(&self) -> String {
        std_symbol(&self.symbol, &self.exchange)
    }
}

/// Resampled candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarData {
    /// Instrument code
    pub symbol: String,
    /// Bar interval
    pub interval: Interval,
    /// Bucket start time
    pub timestamp: DateTime<Utc>,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Accumulated volume
    pub volume: i64,
    /// Accumulated turnover
    pub turnover: f64,
    /// Open interest as of the last tick
    pub open_interest: f64,
    /// Time of the last update folded into this bar
    pub update_time: DateTime<Utc>,
}

/// Instrument reference data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractData {
    /// Instrument code
    pub symbol: String,
    /// Exchange id
    pub exchange: String,
    /// Human-readable name
    pub name: String,
    /// Contract multiplier
    pub size: f64,
    /// Minimum price increment
    pub price_tick: f64,
}

/// Build the canonical `"<instrument>.<exchange>"` routing key
#[must_use]
pub fn std_symbol(symbol: &str, exchange: &str) -> String {
    if exchange.is_empty() {
        symbol.to_string()
    } else {
        format!("{symbol}.{exchange}")
    }
}

/// Split a symbol of the form `"<instrument>.<exchange>"` into its parts.
/// A bare instrument code yields an empty exchange.
#[must_use]
pub fn parse_symbol(s: &str) -> (String, String) {
    match s.split_once('.') {
        Some((instrument, exchange)) => (instrument.to_string(), exchange.to_string()),
        None => (s.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_round_trip() {
        let (instrument, exchange) = parse_symbol("rb2505.SHFE");
        assert_eq!(instrument, "rb2505");
        assert_eq!(exchange, "SHFE");
        assert_eq!(std_symbol(&instrument, &exchange), "rb2505.SHFE");
    }

    #[test]
    fn test_parse_symbol_bare() {
        let (instrument, exchange) = parse_symbol("IM2603");
        assert_eq!(instrument, "IM2603");
        assert!(exchange.is_empty());
        assert_eq!(std_symbol(&instrument, &exchange), "IM2603");
    }
}
