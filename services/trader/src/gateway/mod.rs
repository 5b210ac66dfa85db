//! Gateway capability consumed by the trader.
//!
//! The upstream SDK is out of scope; the trader sees a `Gateway` trait plus a
//! typed event queue. Instead of per-kind callbacks, the gateway owns the
//! sending half of a single-producer channel and the trader drains the
//! receiving half onto the event bus, so gateway-side I/O never touches bus
//! handlers directly.

pub mod sim;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use qtrader_common::errors::TraderResult;
use qtrader_common::types::{
    AccountData, BarData, ContractData, Interval, OrderData, OrderRequest, PositionData, TickData,
    TradeData,
};

pub use sim::SimGateway;

/// Typed update emitted by the gateway's I/O loop
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Market tick
    Tick(TickData),
    /// Completed bar
    Bar(BarData),
    /// Child order changed
    Order(OrderData),
    /// Fill created
    Trade(TradeData),
    /// Position changed
    Position(PositionData),
    /// Account snapshot changed
    Account(AccountData),
    /// Contract reference data loaded
    Contract(ContractData),
    /// Upstream session state changed
    Status {
        /// Whether the upstream session is live
        connected: bool,
        /// Time of the change
        at: DateTime<Utc>,
    },
}

/// Sending half handed to a gateway at construction
pub type GatewayEventSender = mpsc::Sender<GatewayEvent>;

/// Receiving half drained by the trader
pub type GatewayEventReceiver = mpsc::Receiver<GatewayEvent>;

/// Capacity of the gateway-to-trader event queue
pub const GATEWAY_QUEUE_CAPACITY: usize = 4096;

/// Create the gateway event queue
#[must_use]
pub fn gateway_channel() -> (GatewayEventSender, GatewayEventReceiver) {
    mpsc::channel(GATEWAY_QUEUE_CAPACITY)
}

/// Contract between the trader and an upstream brokerage adapter.
///
/// For every child order submitted, the owning trader receives at least one
/// order event carrying either a terminal status or a strictly increasing
/// `volume_traded`; every fill produces exactly one trade event with its own
/// trade id. Subscriptions are idempotent.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Establish the upstream session. Idempotent; state changes surface as
    /// `GatewayEvent::Status`.
    async fn connect(&self) -> TraderResult<bool>;

    /// Tear down the upstream session. Idempotent.
    async fn disconnect(&self) -> TraderResult<bool>;

    /// Whether the upstream session is live
    fn is_connected(&self) -> bool;

    /// Subscribe quote streams for the given symbols. Idempotent; already
    /// subscribed symbols produce no extra upstream traffic.
    async fn subscribe(&self, symbols: &[String]) -> TraderResult<bool>;

    /// Drop quote subscriptions for the given symbols. Idempotent.
    async fn unsubscribe(&self, symbols: &[String]) -> TraderResult<bool>;

    /// Subscribe bar production for one symbol/interval. Idempotent.
    async fn subscribe_bars(&self, symbol: &str, interval: Interval) -> TraderResult<bool>;

    /// Submit a child order. Fire-and-forget: the returned snapshot is the
    /// initial pending state, confirmation arrives on the event queue.
    /// `price: None` is a market order filled at the opposing best quote.
    async fn send_order(&self, request: OrderRequest) -> TraderResult<OrderData>;

    /// Cancel a child order by id
    async fn cancel_order(&self, order_id: &str) -> TraderResult<bool>;

    /// Account snapshot, if one has materialized
    fn get_account(&self) -> Option<AccountData>;

    /// Position snapshots
    fn get_positions(&self) -> Vec<PositionData>;

    /// Order snapshots
    fn get_orders(&self) -> Vec<OrderData>;

    /// Fill snapshots
    fn get_trades(&self) -> Vec<TradeData>;

    /// Latest quote per subscribed symbol
    fn get_quotes(&self) -> Vec<TickData>;

    /// Completed bars for one symbol/interval, oldest first
    fn get_kline(&self, symbol: &str, interval: Interval) -> Vec<BarData>;

    /// Contract reference data
    fn get_contracts(&self) -> Vec<ContractData>;

    /// Current trading day as `YYYYMMDD`; after 20:00 local this is the next
    /// non-weekend day.
    fn get_trading_day(&self) -> String;
}

/// Trading-day calculation shared by gateway implementations
#[must_use]
pub fn trading_day_for(now: DateTime<Utc>) -> String {
    use chrono::{Datelike, Duration, Timelike, Weekday};
    let mut day = now.date_naive();
    if now.hour() >= 20 {
        day += Duration::days(1);
    }
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day += Duration::days(1);
    }
    day.format("%Y%m%d").to_string()
}
