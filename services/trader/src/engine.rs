//! Trading engine: the seam between order flow and the gateway.
//!
//! Owns the gateway handle, the pre-trade risk counters and the pause flag.
//! Everything that submits or cancels child orders goes through here so risk
//! accounting and pause semantics hold for strategies, the executor and the
//! IPC surface alike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use qtrader_common::config::AccountConfig;
use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::event_bus::{EventBus, TraderEvent};
use qtrader_common::types::{
    AccountData, AccountStatusUpdate, BarData, Interval, OrderData, OrderRequest, PositionData,
    TickData, TradeData, TraderState,
};

use crate::gateway::Gateway;
use crate::risk::RiskControl;

/// Per-account trading engine
pub struct TradingEngine {
    account_id: String,
    gateway: Arc<dyn Gateway>,
    bus: EventBus,
    risk: Mutex<RiskControl>,
    paused: AtomicBool,
}

impl TradingEngine {
    /// Assemble the engine for one account
    #[must_use]
    pub fn new(config: &AccountConfig, gateway: Arc<dyn Gateway>, bus: EventBus) -> Self {
        Self {
            account_id: config.account_id.clone(),
            gateway,
            bus,
            risk: Mutex::new(RiskControl::new(config.trading.risk.clone())),
            paused: AtomicBool::new(config.trading.paused),
        }
    }

    /// Account id this engine trades
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// The gateway handle
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// The event bus
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Whether the upstream gateway session is live
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.gateway.is_connected()
    }

    /// Whether trading is administratively paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Kick off the gateway connect in the background
    pub fn connect(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.gateway.connect().await {
                error!(account_id = %engine.account_id, error = %e, "gateway connect failed");
                engine
                    .bus
                    .publish(TraderEvent::SystemError(format!("gateway connect: {e}")));
            }
        });
    }

    /// Disconnect the gateway
    pub async fn disconnect(&self) -> TraderResult<bool> {
        self.gateway.disconnect().await
    }

    /// Submit a child order after pause and risk checks.
    /// `price <= 0` is treated as a market order.
    pub async fn insert_order(&self, mut request: OrderRequest) -> TraderResult<OrderData> {
        if !self.gateway.is_connected() {
            return Err(TraderError::Gateway(
                "gateway not connected, order refused".to_string(),
            ));
        }
        if self.is_paused() {
            return Err(TraderError::Risk("trading is paused".to_string()));
        }
        if matches!(request.price, Some(p) if p <= 0.0) {
            request.price = None;
        }
        self.risk.lock().check_order(request.volume)?;

        let order = self.gateway.send_order(request).await?;
        self.risk.lock().on_order_inserted();
        info!(
            account_id = %self.account_id,
            order_id = %order.order_id,
            symbol = %order.symbol,
            direction = %order.direction,
            offset = %order.offset,
            volume = order.volume_original,
            price = ?order.price,
            "order submitted"
        );
        Ok(order)
    }

    /// Cancel a child order after the cancel-rate check
    pub async fn cancel_order(&self, order_id: &str) -> TraderResult<bool> {
        if !self.gateway.is_connected() {
            warn!(account_id = %self.account_id, order_id, "cancel with gateway down");
            return Ok(false);
        }
        self.risk.lock().check_cancel()?;
        let ok = self.gateway.cancel_order(order_id).await?;
        if ok {
            self.risk.lock().on_order_cancelled();
        }
        Ok(ok)
    }

    /// Pause trading and broadcast the state change
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!(account_id = %self.account_id, "trading paused");
        self.publish_status();
    }

    /// Resume trading and broadcast the state change
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!(account_id = %self.account_id, "trading resumed");
        self.publish_status();
    }

    /// Account snapshot decorated with connection, pause and risk state
    #[must_use]
    pub fn account(&self) -> Option<AccountData> {
        let mut account = self.gateway.get_account()?;
        account.account_id = self.account_id.clone();
        account.gateway_connected = self.gateway.is_connected();
        account.trade_paused = self.is_paused();
        account.risk_status = self.risk.lock().status();
        Some(account)
    }

    /// Position snapshots
    #[must_use]
    pub fn positions(&self) -> Vec<PositionData> {
        self.gateway.get_positions()
    }

    /// Order snapshots
    #[must_use]
    pub fn orders(&self) -> Vec<OrderData> {
        self.gateway.get_orders()
    }

    /// One order by id
    #[must_use]
    pub fn order(&self, order_id: &str) -> Option<OrderData> {
        self.gateway
            .get_orders()
            .into_iter()
            .find(|o| o.order_id == order_id)
    }

    /// Orders still active
    #[must_use]
    pub fn active_orders(&self) -> Vec<OrderData> {
        self.gateway
            .get_orders()
            .into_iter()
            .filter(OrderData::is_active)
            .collect()
    }

    /// Fill snapshots
    #[must_use]
    pub fn trades(&self) -> Vec<TradeData> {
        self.gateway.get_trades()
    }

    /// One fill by id
    #[must_use]
    pub fn trade(&self, trade_id: &str) -> Option<TradeData> {
        self.gateway
            .get_trades()
            .into_iter()
            .find(|t| t.trade_id == trade_id)
    }

    /// Latest quotes
    #[must_use]
    pub fn quotes(&self) -> Vec<TickData> {
        self.gateway.get_quotes()
    }

    /// Completed bars for one symbol/interval
    #[must_use]
    pub fn kline(&self, symbol: &str, interval: Interval) -> Vec<BarData> {
        self.gateway.get_kline(symbol, interval)
    }

    /// Current trading day as `YYYYMMDD`
    #[must_use]
    pub fn trading_day(&self) -> String {
        self.gateway.get_trading_day()
    }

    /// Subscribe quote streams
    pub async fn subscribe_symbols(&self, symbols: &[String]) -> TraderResult<bool> {
        self.gateway.subscribe(symbols).await
    }

    /// Drop quote subscriptions
    pub async fn unsubscribe_symbols(&self, symbols: &[String]) -> TraderResult<bool> {
        self.gateway.unsubscribe(symbols).await
    }

    /// Subscribe bar production
    pub async fn subscribe_bars(&self, symbol: &str, interval: Interval) -> TraderResult<bool> {
        self.gateway.subscribe_bars(symbol, interval).await
    }

    /// Reload risk limits at runtime
    pub fn update_risk_config(&self, config: qtrader_common::config::RiskConfig) {
        self.risk.lock().update_config(config);
    }

    fn publish_status(&self) {
        let status = if self.gateway.is_connected() {
            TraderState::Connected
        } else {
            TraderState::Connecting
        };
        self.bus
            .publish(TraderEvent::AccountStatus(AccountStatusUpdate {
                account_id: self.account_id.clone(),
                status,
                gateway_connected: self.gateway.is_connected(),
                trade_paused: self.is_paused(),
                timestamp: Utc::now(),
            }));
        if let Some(account) = self.account() {
            self.bus.publish(TraderEvent::Account(account));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{gateway_channel, SimGateway};
    use qtrader_common::config::{ContractSeed, GatewayConfig};
    use qtrader_common::types::{Direction, Offset};

    fn engine() -> (Arc<TradingEngine>, Arc<SimGateway>) {
        let (tx, _rx) = gateway_channel();
        let config = AccountConfig {
            account_id: "a1".to_string(),
            enabled: true,
            auto_spawn: false,
            debug: false,
            trading: Default::default(),
            gateway: GatewayConfig {
                kind: "sim".to_string(),
                feed_interval_ms: None,
                contracts: vec![ContractSeed {
                    symbol: "rb2505".to_string(),
                    exchange: "SHFE".to_string(),
                    price: 3500.0,
                    price_tick: 1.0,
                }],
            },
            strategies: Default::default(),
        };
        let sim = Arc::new(SimGateway::new("a1", config.gateway.clone(), tx));
        let gateway: Arc<dyn Gateway> = Arc::clone(&sim) as Arc<dyn Gateway>;
        let bus = EventBus::default();
        bus.start();
        (Arc::new(TradingEngine::new(&config, gateway, bus)), sim)
    }

    fn tick(price: f64) -> TickData {
        TickData {
            symbol: "rb2505".to_string(),
            exchange: "SHFE".to_string(),
            timestamp: Utc::now(),
            last_price: price,
            bid1: price - 1.0,
            ask1: price + 1.0,
            bid_vol1: 10,
            ask_vol1: 10,
            volume: 1,
            turnover: price,
            open_interest: 0.0,
            open: price,
            high: price,
            low: price,
            pre_close: price,
            limit_up: price * 1.1,
            limit_down: price * 0.9,
        }
    }

    #[tokio::test]
    async fn test_insert_order_requires_connection() {
        let (engine, sim) = engine();
        let err = engine
            .insert_order(OrderRequest {
                symbol: "rb2505".to_string(),
                direction: Direction::Buy,
                offset: Offset::Open,
                volume: 1,
                price: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "gateway");
    }

    #[tokio::test]
    async fn test_paused_engine_refuses_orders() {
        let (engine, sim) = engine();
        engine.gateway().connect().await.unwrap();
        engine.pause();
        let err = engine
            .insert_order(OrderRequest {
                symbol: "rb2505".to_string(),
                direction: Direction::Buy,
                offset: Offset::Open,
                volume: 1,
                price: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "risk");

        engine.resume();
        sim.inject_tick(tick(3500.0));
        assert!(engine
            .insert_order(OrderRequest {
                symbol: "rb2505".to_string(),
                direction: Direction::Buy,
                offset: Offset::Open,
                volume: 1,
                price: None,
            })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_risk_cap_blocks_oversized_order() {
        let (engine, sim) = engine();
        engine.gateway().connect().await.unwrap();
        sim.inject_tick(tick(3500.0));
        let err = engine
            .insert_order(OrderRequest {
                symbol: "rb2505".to_string(),
                direction: Direction::Buy,
                offset: Offset::Open,
                volume: 1000,
                price: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "risk");
    }

    #[tokio::test]
    async fn test_account_is_decorated() {
        let (engine, sim) = engine();
        engine.gateway().connect().await.unwrap();
        engine.pause();
        let account = engine.account().unwrap();
        assert!(account.trade_paused);
        assert!(account.gateway_connected);
        assert!(account.risk_status.contains("orders"));
    }
}
