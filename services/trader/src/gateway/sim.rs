//! In-process paper gateway.
//!
//! Orders are matched against the latest quote: market orders fill at the
//! opposing best quote, limit orders rest until a tick crosses their price.
//! All caches are read by value through the `Gateway` getters; mutation
//! happens on the gateway side of the event queue only.
//!
//! Quotes come from two sources: `inject_tick` (tests, replays) and an
//! optional synthetic random-walk feed task started on connect when
//! `feed_interval_ms` is configured.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use qtrader_common::config::GatewayConfig;
use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::types::{
    AccountData, BarData, ContractData, Direction, Interval, OrderData, OrderRequest, OrderStatus,
    PosSide, PositionData, PriceType, TickData, TradeData,
};

use super::{trading_day_for, Gateway, GatewayEvent, GatewayEventSender};
use crate::bars::MultiSymbolBarGenerator;

/// Margin rate applied to simulated positions
const MARGIN_RATE: f64 = 0.1;
/// Starting balance of the simulated account
const SEED_BALANCE: f64 = 1_000_000.0;

struct SimState {
    account: AccountData,
    positions: FxHashMap<(String, PosSide), PositionData>,
    orders: FxHashMap<String, OrderData>,
    trades: Vec<TradeData>,
    quotes: FxHashMap<String, TickData>,
    contracts: FxHashMap<String, ContractData>,
    subscriptions: FxHashSet<String>,
    bars: MultiSymbolBarGenerator,
}

/// Paper-trading gateway implementation
pub struct SimGateway {
    account_id: String,
    config: GatewayConfig,
    events: GatewayEventSender,
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<SimState>>,
    next_order_seq: AtomicU64,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimGateway {
    /// Create a gateway for one account; events flow out on `events`
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        config: GatewayConfig,
        events: GatewayEventSender,
    ) -> Self {
        let account_id = account_id.into();
        Self {
            account_id: account_id.clone(),
            config,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SimState {
                account: seed_account(&account_id),
                positions: FxHashMap::default(),
                orders: FxHashMap::default(),
                trades: Vec::new(),
                quotes: FxHashMap::default(),
                contracts: FxHashMap::default(),
                subscriptions: FxHashSet::default(),
                bars: MultiSymbolBarGenerator::new(),
            })),
            next_order_seq: AtomicU64::new(1),
            feed_task: Mutex::new(None),
        }
    }

    /// Feed one quote into the gateway: updates caches, produces bars and
    /// matches resting orders. The entry point for tests and replays; the
    /// synthetic feed goes through the same path.
    pub fn inject_tick(&self, tick: TickData) {
        apply_tick(&self.state, &self.events, &self.account_id, tick);
    }

    fn next_order_id(&self) -> String {
        format!("sim-{}", self.next_order_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: GatewayEvent) {
        emit(&self.events, event);
    }
}

#[async_trait]
impl Gateway for SimGateway {
    async fn connect(&self) -> TraderResult<bool> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(true);
        }
        info!(account_id = %self.account_id, "sim gateway connecting");
        {
            let mut state = self.state.lock();
            for seed in &self.config.contracts {
                let contract = ContractData {
                    symbol: seed.symbol.clone(),
                    exchange: seed.exchange.clone(),
                    name: seed.symbol.clone(),
                    size: 10.0,
                    price_tick: seed.price_tick,
                };
                state
                    .contracts
                    .insert(seed.symbol.clone(), contract.clone());
                self.emit(GatewayEvent::Contract(contract));
            }
            state.account.gateway_connected = true;
            state.account.update_time = Utc::now();
            self.emit(GatewayEvent::Account(state.account.clone()));
        }
        self.emit(GatewayEvent::Status {
            connected: true,
            at: Utc::now(),
        });

        if let Some(interval_ms) = self.config.feed_interval_ms {
            let state = Arc::clone(&self.state);
            let events = self.events.clone();
            let connected = Arc::clone(&self.connected);
            let account_id = self.account_id.clone();
            let seeds: Vec<(String, String, f64)> = self
                .config
                .contracts
                .iter()
                .map(|c| (c.symbol.clone(), c.exchange.clone(), c.price))
                .collect();
            let handle = tokio::spawn(run_feed(
                state,
                events,
                connected,
                account_id,
                seeds,
                interval_ms,
            ));
            *self.feed_task.lock() = Some(handle);
        }
        Ok(true)
    }

    async fn disconnect(&self) -> TraderResult<bool> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(true);
        }
        if let Some(handle) = self.feed_task.lock().take() {
            handle.abort();
        }
        {
            let mut state = self.state.lock();
            state.account.gateway_connected = false;
            state.account.update_time = Utc::now();
        }
        self.emit(GatewayEvent::Status {
            connected: false,
            at: Utc::now(),
        });
        info!(account_id = %self.account_id, "sim gateway disconnected");
        Ok(true)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, symbols: &[String]) -> TraderResult<bool> {
        let mut state = self.state.lock();
        for symbol in symbols {
            if state.subscriptions.insert(symbol.clone()) {
                debug!(symbol = %symbol, "quote subscription added");
            }
        }
        Ok(true)
    }

    async fn unsubscribe(&self, symbols: &[String]) -> TraderResult<bool> {
        let mut state = self.state.lock();
        for symbol in symbols {
            if state.subscriptions.remove(symbol) {
                debug!(symbol = %symbol, "quote subscription dropped");
            }
        }
        Ok(true)
    }

    async fn subscribe_bars(&self, symbol: &str, interval: Interval) -> TraderResult<bool> {
        let mut state = self.state.lock();
        state.subscriptions.insert(symbol.to_string());
        state.bars.get_or_create(symbol).subscribe(interval);
        Ok(true)
    }

    async fn send_order(&self, request: OrderRequest) -> TraderResult<OrderData> {
        if !self.is_connected() {
            return Err(TraderError::Gateway("gateway not connected".to_string()));
        }
        let order_id = self.next_order_id();
        let now = Utc::now();
        let exchange = {
            let state = self.state.lock();
            state
                .contracts
                .get(&request.symbol)
                .map(|c| c.exchange.clone())
                .unwrap_or_default()
        };
        let order = OrderData {
            order_id: order_id.clone(),
            symbol: request.symbol.clone(),
            exchange,
            direction: request.direction,
            offset: request.offset,
            volume_original: request.volume,
            volume_traded: 0,
            traded_price: 0.0,
            price: request.price,
            price_type: if request.price.is_some() {
                PriceType::Limit
            } else {
                PriceType::Market
            },
            status: OrderStatus::Pending,
            status_msg: "submitted".to_string(),
            gateway_order_id: order_id.clone(),
            insert_time: now,
            update_time: now,
        };
        {
            let mut state = self.state.lock();
            state.orders.insert(order_id.clone(), order.clone());
        }
        self.emit(GatewayEvent::Order(order.clone()));
        debug!(
            order_id = %order_id,
            symbol = %order.symbol,
            volume = order.volume_original,
            "sim order accepted"
        );

        // A marketable order fills against the current quote right away.
        match_orders(&self.state, &self.events, &self.account_id, &order.symbol);
        let snapshot = self
            .state
            .lock()
            .orders
            .get(&order_id)
            .cloned()
            .unwrap_or(order);
        Ok(snapshot)
    }

    async fn cancel_order(&self, order_id: &str) -> TraderResult<bool> {
        let updated = {
            let mut state = self.state.lock();
            match state.orders.get_mut(order_id) {
                Some(order) if order.is_active() => {
                    order.status = OrderStatus::Finished;
                    order.status_msg = "cancelled".to_string();
                    order.update_time = Utc::now();
                    Some(order.clone())
                }
                _ => None,
            }
        };
        match updated {
            Some(order) => {
                self.emit(GatewayEvent::Order(order));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_account(&self) -> Option<AccountData> {
        Some(self.state.lock().account.clone())
    }

    fn get_positions(&self) -> Vec<PositionData> {
        self.state.lock().positions.values().cloned().collect()
    }

    fn get_orders(&self) -> Vec<OrderData> {
        let mut orders: Vec<OrderData> = self.state.lock().orders.values().cloned().collect();
        orders.sort_by(|a, b| a.insert_time.cmp(&b.insert_time));
        orders
    }

    fn get_trades(&self) -> Vec<TradeData> {
        self.state.lock().trades.clone()
    }

    fn get_quotes(&self) -> Vec<TickData> {
        self.state.lock().quotes.values().cloned().collect()
    }

    fn get_kline(&self, symbol: &str, interval: Interval) -> Vec<BarData> {
        self.state
            .lock()
            .bars
            .get(symbol)
            .map(|g| g.get_bars(interval, 1000))
            .unwrap_or_default()
    }

    fn get_contracts(&self) -> Vec<ContractData> {
        self.state.lock().contracts.values().cloned().collect()
    }

    fn get_trading_day(&self) -> String {
        trading_day_for(Utc::now())
    }
}

fn seed_account(account_id: &str) -> AccountData {
    let mut account = AccountData::empty(account_id);
    account.balance = SEED_BALANCE;
    account.available = SEED_BALANCE;
    account.pre_balance = SEED_BALANCE;
    account.broker_name = "sim".to_string();
    account
}

fn emit(events: &GatewayEventSender, event: GatewayEvent) {
    if let Err(e) = events.try_send(event) {
        warn!(error = %e, "gateway event queue full, update dropped");
    }
}

fn apply_tick(
    state: &Mutex<SimState>,
    events: &GatewayEventSender,
    account_id: &str,
    tick: TickData,
) {
    let bars = {
        let mut state = state.lock();
        state.quotes.insert(tick.symbol.clone(), tick.clone());
        state.bars.update_tick(&tick)
    };
    emit(events, GatewayEvent::Tick(tick.clone()));
    for bar in bars {
        emit(events, GatewayEvent::Bar(bar));
    }
    match_orders(state, events, account_id, &tick.symbol);
}

/// Match resting orders for one symbol against its latest quote. Fills are
/// all-or-nothing at the matched price.
fn match_orders(
    state: &Mutex<SimState>,
    events: &GatewayEventSender,
    account_id: &str,
    symbol: &str,
) {
    let mut fills: Vec<(OrderData, TradeData, PositionData, AccountData)> = Vec::new();
    {
        let mut guard = state.lock();
        let Some(tick) = guard.quotes.get(symbol).cloned() else {
            return;
        };
        let order_ids: Vec<String> = guard
            .orders
            .values()
            .filter(|o| o.is_active() && o.symbol == symbol)
            .map(|o| o.order_id.clone())
            .collect();
        for order_id in order_ids {
            let Some(order) = guard.orders.get(&order_id).cloned() else {
                continue;
            };
            let fill_price = match (order.price, order.direction) {
                (None, Direction::Buy) => Some(tick.ask1),
                (None, Direction::Sell) => Some(tick.bid1),
                (Some(limit), Direction::Buy) if tick.last_price <= limit => {
                    Some(tick.last_price)
                }
                (Some(limit), Direction::Sell) if tick.last_price >= limit => {
                    Some(tick.last_price)
                }
                _ => None,
            };
            let Some(price) = fill_price else {
                continue;
            };
            let filled = fill_order(&mut guard, account_id, &order_id, price);
            if let Some(result) = filled {
                fills.push(result);
            }
        }
    }
    for (order, trade, position, account) in fills {
        emit(events, GatewayEvent::Order(order));
        emit(events, GatewayEvent::Trade(trade));
        emit(events, GatewayEvent::Position(position));
        emit(events, GatewayEvent::Account(account));
    }
}

fn fill_order(
    state: &mut SimState,
    account_id: &str,
    order_id: &str,
    price: f64,
) -> Option<(OrderData, TradeData, PositionData, AccountData)> {
    let now = Utc::now();
    let order = state.orders.get_mut(order_id)?;
    let volume = order.volume_left();
    if volume <= 0 {
        return None;
    }
    order.volume_traded = order.volume_original;
    order.traded_price = price;
    order.status = OrderStatus::Finished;
    order.status_msg = "all traded".to_string();
    order.update_time = now;
    let order = order.clone();

    let trade = TradeData {
        trade_id: format!("{order_id}-f{}", state.trades.len() + 1),
        order_id: order_id.to_string(),
        symbol: order.symbol.clone(),
        exchange: order.exchange.clone(),
        direction: order.direction,
        offset: order.offset,
        price,
        volume,
        trade_time: now,
        trading_day: trading_day_for(now),
        commission: price * volume as f64 * 0.0001,
    };
    state.trades.push(trade.clone());

    // Position bookkeeping: opens add to the direction's side, closes reduce
    // the opposite side.
    let side = match (order.offset.is_close(), order.direction) {
        (false, Direction::Buy) | (true, Direction::Sell) => PosSide::Long,
        (false, Direction::Sell) | (true, Direction::Buy) => PosSide::Short,
    };
    let key = (order.symbol.clone(), side);
    let position = state.positions.entry(key).or_insert_with(|| PositionData {
        symbol: order.symbol.clone(),
        exchange: order.exchange.clone(),
        side,
        net_pos: 0,
        yd_pos: 0,
        td_pos: 0,
        avg_price: 0.0,
        hold_profit: 0.0,
        margin: 0.0,
    });
    if order.offset.is_close() {
        position.net_pos -= volume;
        position.td_pos = (position.td_pos - volume).max(0);
        position.margin = position.avg_price * position.net_pos as f64 * MARGIN_RATE;
    } else {
        let new_total = position.net_pos + volume;
        position.avg_price = (position.avg_price * position.net_pos as f64
            + price * volume as f64)
            / new_total as f64;
        position.net_pos = new_total;
        position.td_pos += volume;
        position.margin = position.avg_price * position.net_pos as f64 * MARGIN_RATE;
    }
    let position = position.clone();

    let margin_total: f64 = state.positions.values().map(|p| p.margin).sum();
    state.account.margin = margin_total;
    state.account.available = state.account.balance - margin_total;
    state.account.risk_ratio = if state.account.balance > 0.0 {
        margin_total / state.account.balance
    } else {
        0.0
    };
    state.account.account_id = account_id.to_string();
    state.account.update_time = now;

    Some((order, trade, position, state.account.clone()))
}

async fn run_feed(
    state: Arc<Mutex<SimState>>,
    events: GatewayEventSender,
    connected: Arc<AtomicBool>,
    account_id: String,
    seeds: Vec<(String, String, f64)>,
    interval_ms: u64,
) {
    let mut prices: FxHashMap<String, f64> =
        seeds.iter().map(|(s, _, p)| (s.clone(), *p)).collect();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(10)));
    info!(symbols = seeds.len(), interval_ms, "synthetic feed started");
    while connected.load(Ordering::SeqCst) {
        ticker.tick().await;
        let subscribed: FxHashSet<String> = state.lock().subscriptions.iter().cloned().collect();
        for (symbol, exchange, seed_price) in &seeds {
            if !subscribed.contains(symbol) {
                continue;
            }
            let price = prices.entry(symbol.clone()).or_insert(*seed_price);
            let step = {
                let mut rng = rand::thread_rng();
                rng.gen_range(-1.0..=1.0)
            };
            *price = (*price + step).max(1.0);
            let last = *price;
            let tick = TickData {
                symbol: symbol.clone(),
                exchange: exchange.clone(),
                timestamp: Utc::now(),
                last_price: last,
                bid1: last - 1.0,
                ask1: last + 1.0,
                bid_vol1: 10,
                ask_vol1: 10,
                volume: 1,
                turnover: last,
                open_interest: 0.0,
                open: *seed_price,
                high: last,
                low: last,
                pre_close: *seed_price,
                limit_up: seed_price * 1.1,
                limit_down: seed_price * 0.9,
            };
            apply_tick(&state, &events, &account_id, tick);
        }
    }
    info!("synthetic feed stopped");
}
