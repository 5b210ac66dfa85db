//! Typed bus payloads

use serde_json::Value;

use crate::constants::{push, topics};
use crate::types::{
    AccountData, AccountStatusUpdate, BarData, OrderCmdView, OrderData, PositionData, TickData,
    TradeData,
};

/// Union of everything that travels on the event bus. Each variant maps to a
/// fixed topic, so routing never inspects payload internals.
#[derive(Debug, Clone)]
pub enum TraderEvent {
    /// Account snapshot changed
    Account(AccountData),
    /// Gateway / supervision state changed
    AccountStatus(AccountStatusUpdate),
    /// Position changed
    Position(PositionData),
    /// Child order changed
    Order(OrderData),
    /// Fill created
    Trade(TradeData),
    /// Market tick
    Tick(TickData),
    /// Completed bar
    Bar(BarData),
    /// Compound order command changed
    OrderCmd(OrderCmdView),
    /// Component error surfaced for observers
    SystemError(String),
}

impl TraderEvent {
    /// The topic this event is published on
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Account(_) => topics::ACCOUNT_UPDATE,
            Self::AccountStatus(_) => topics::ACCOUNT_STATUS,
            Self::Position(_) => topics::POSITION_UPDATE,
            Self::Order(_) => topics::ORDER_UPDATE,
            Self::Trade(_) => topics::TRADE_CREATED,
            Self::Tick(_) => topics::TICK_UPDATE,
            Self::Bar(_) => topics::KLINE_UPDATE,
            Self::OrderCmd(_) => topics::ORDER_CMD_UPDATE,
            Self::SystemError(_) => topics::SYSTEM_ERROR,
        }
    }

    /// The push-frame `msg_type` for events forwarded over IPC.
    /// `None` marks events that never leave the process (ticks, bars,
    /// internal errors).
    #[must_use]
    pub const fn push_msg_type(&self) -> Option<&'static str> {
        match self {
            Self::Account(_) => Some(push::ACCOUNT),
            Self::AccountStatus(_) => Some(push::ACCOUNT_STATUS),
            Self::Position(_) => Some(push::POSITION),
            Self::Order(_) => Some(push::ORDER),
            Self::Trade(_) => Some(push::TRADE),
            Self::OrderCmd(_) => Some(push::ORDER_CMD),
            Self::Tick(_) | Self::Bar(_) | Self::SystemError(_) => None,
        }
    }

    /// Serialize the payload (without the event tag) for the wire
    #[must_use]
    pub fn payload_json(&self) -> Value {
        let result = match self {
            Self::Account(data) => serde_json::to_value(data),
            Self::AccountStatus(data) => serde_json::to_value(data),
            Self::Position(data) => serde_json::to_value(data),
            Self::Order(data) => serde_json::to_value(data),
            Self::Trade(data) => serde_json::to_value(data),
            Self::Tick(data) => serde_json::to_value(data),
            Self::Bar(data) => serde_json::to_value(data),
            Self::OrderCmd(data) => serde_json::to_value(data),
            Self::SystemError(msg) => serde_json::to_value(msg),
        };
        result.unwrap_or(Value::Null)
    }
}
