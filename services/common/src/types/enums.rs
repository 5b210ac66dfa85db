//! Canonical enums shared across the runtime

use serde::{Deserialize, Serialize};

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Buy
    Buy,
    /// Sell
    Sell,
}

impl Direction {
    /// The opposing direction (used when closing a position)
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Open/close flag of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// Open a new position
    Open,
    /// Close an existing position
    Close,
    /// Close today's position (exchanges that distinguish)
    CloseToday,
    /// Close yesterday's position
    CloseYesterday,
}

impl Offset {
    /// Whether this offset reduces an existing position
    #[must_use]
    pub const fn is_close(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::CloseToday => write!(f, "close_today"),
            Self::CloseYesterday => write!(f, "close_yesterday"),
        }
    }
}

/// Child order status; `Pending` is the only active state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Submitted, not yet terminal
    Pending,
    /// Fully processed by the exchange (filled or cancelled)
    Finished,
    /// Rejected by broker or exchange
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses accept no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Rejected)
    }
}

/// Price type of a child order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    /// Limit order at a fixed price
    Limit,
    /// Market order, gateway substitutes the opposing best quote
    Market,
    /// Fill-or-kill
    Fok,
    /// Fill-and-kill (immediate or cancel)
    Fak,
}

/// Position side; long and short are tracked independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PosSide {
    /// Long side
    Long,
    /// Short side
    Short,
}

impl std::fmt::Display for PosSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// 1 minute
    M1,
    /// 5 minutes
    M5,
    /// 15 minutes
    M15,
    /// 30 minutes
    M30,
    /// 1 hour
    H1,
    /// 1 day
    D1,
}

impl Interval {
    /// Bucket width in minutes
    #[must_use]
    pub const fn minutes(self) -> u32 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::D1 => 1440,
        }
    }

    /// Parse the configuration string form ("M1", "M5", "M15", "M30", "H1", "D1")
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "M1" => Some(Self::M1),
            "M5" => Some(Self::M5),
            "M15" => Some(Self::M15),
            "M30" => Some(Self::M30),
            "H1" => Some(Self::H1),
            "D1" => Some(Self::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M1 => write!(f, "M1"),
            Self::M5 => write!(f, "M5"),
            Self::M15 => write!(f, "M15"),
            Self::M30 => write!(f, "M30"),
            Self::H1 => write!(f, "H1"),
            Self::D1 => write!(f, "D1"),
        }
    }
}

/// Supervision state of a trader connection, as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraderState {
    /// No live trader process, or explicitly stopped
    Stopped,
    /// Process exists, socket connection being established
    Connecting,
    /// Socket handshake completed
    Connected,
}

impl std::fmt::Display for TraderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Volume-splitting policy of a compound order command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Fixed-size chunks separated by the order interval
    Simple,
    /// Time-weighted slices spread over a fixed duration
    Twap,
}

/// Lifecycle state of a compound order command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdStatus {
    /// Created, not yet registered with the executor
    Pending,
    /// Registered and being driven
    Running,
    /// Terminal; absorbing
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Buy.opposite(), Direction::Sell);
        assert_eq!(Direction::Sell.opposite(), Direction::Buy);
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Finished.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!(Interval::parse("M5"), Some(Interval::M5));
        assert_eq!(Interval::parse("m15"), Some(Interval::M15));
        assert_eq!(Interval::parse("W1"), None);
        assert_eq!(Interval::H1.minutes(), 60);
        assert_eq!(Interval::D1.minutes(), 1440);
    }

    #[test]
    fn test_serde_wire_form() {
        assert_eq!(serde_json::to_string(&Direction::Buy).unwrap(), "\"buy\"");
        assert_eq!(
            serde_json::to_string(&Offset::CloseToday).unwrap(),
            "\"close_today\""
        );
        assert_eq!(
            serde_json::from_str::<TraderState>("\"connecting\"").unwrap(),
            TraderState::Connecting
        );
    }
}
