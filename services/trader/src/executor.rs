//! Order-command executor: one cooperative loop driving every live command.
//!
//! The executor is the only caller of `OrderCmd::tick`. Each iteration it
//! snapshots the live commands, performs the actions they request through the
//! trading engine, and archives the ones that reached their terminal state.
//! Order and trade events from the bus are routed back to the owning command
//! by child-order membership.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use qtrader_common::constants::{defaults, topics};
use qtrader_common::event_bus::{EventBus, EventHandler, TraderEvent};
use qtrader_common::types::{CmdStatus, OrderCmdView, OrderData, TradeData};

use crate::engine::TradingEngine;
use crate::order_cmd::{CmdAction, OrderCmd};

struct ExecutorInner {
    engine: Arc<TradingEngine>,
    bus: EventBus,
    live: Mutex<FxHashMap<String, OrderCmd>>,
    history: Mutex<FxHashMap<String, OrderCmdView>>,
    subscribed: Mutex<FxHashSet<String>>,
    running: AtomicBool,
}

/// Executor handle; cheap to clone
#[derive(Clone)]
pub struct OrderCmdExecutor {
    inner: Arc<ExecutorInner>,
    loop_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl OrderCmdExecutor {
    /// Create the executor for one trader
    #[must_use]
    pub fn new(engine: Arc<TradingEngine>, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                engine,
                bus,
                live: Mutex::new(FxHashMap::default()),
                history: Mutex::new(FxHashMap::default()),
                subscribed: Mutex::new(FxHashSet::default()),
                running: AtomicBool::new(false),
            }),
            loop_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe bus topics and start the drive loop
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("executor already running");
            return;
        }
        let router = Arc::new(ExecutorRouter {
            inner: Arc::clone(&self.inner),
        });
        self.inner.bus.register(topics::ORDER_UPDATE, router.clone());
        self.inner.bus.register(topics::TRADE_CREATED, router);

        let inner = Arc::clone(&self.inner);
        *self.loop_task.lock() = Some(tokio::spawn(run_loop(inner)));
        info!("order command executor started");
    }

    /// Stop the drive loop, best-effort cancelling live children first
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let active: Vec<String> = {
            let live = self.inner.live.lock();
            live.values()
                .filter_map(|cmd| cmd.active_order_id().map(str::to_string))
                .collect()
        };
        for order_id in active {
            if let Err(e) = self.inner.engine.cancel_order(&order_id).await {
                warn!(order_id = %order_id, error = %e, "drain cancel failed");
            }
        }
        let handle = self.loop_task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(defaults::SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        info!("order command executor stopped");
    }

    /// Register a command: subscribe its symbol, start it, add it to the
    /// live set. Registration is the `Pending → Running` transition.
    pub async fn register(&self, mut cmd: OrderCmd) -> String {
        let symbol = cmd.spec().symbol.clone();
        let needs_subscribe = self.inner.subscribed.lock().insert(symbol.clone());
        if needs_subscribe {
            if let Err(e) = self.inner.engine.subscribe_symbols(&[symbol.clone()]).await {
                warn!(symbol = %symbol, error = %e, "quote subscription failed");
            }
        }

        cmd.register(Utc::now());
        let cmd_id = cmd.cmd_id.clone();
        let view = cmd.view();
        self.inner.live.lock().insert(cmd_id.clone(), cmd);
        self.inner
            .history
            .lock()
            .insert(cmd_id.clone(), view.clone());
        self.inner.bus.publish(TraderEvent::OrderCmd(view));
        debug!(cmd_id = %cmd_id, "order command registered");
        cmd_id
    }

    /// Cancel a running command: withdraw its in-flight child, then close it
    pub async fn close(&self, cmd_id: &str) -> bool {
        let active = {
            let live = self.inner.live.lock();
            match live.get(cmd_id) {
                Some(cmd) if cmd.is_active() => cmd.active_order_id().map(str::to_string),
                _ => return false,
            }
        };
        if let Some(order_id) = active {
            if let Err(e) = self.inner.engine.cancel_order(&order_id).await {
                warn!(order_id = %order_id, error = %e, "cancel on close failed");
            }
        }
        let view = {
            let mut live = self.inner.live.lock();
            let Some(cmd) = live.get_mut(cmd_id) else {
                return false;
            };
            cmd.close(Utc::now());
            cmd.view()
        };
        self.inner.publish_update(view);
        info!(cmd_id = %cmd_id, "order command closed");
        true
    }

    /// Snapshot of one command, live or archived
    #[must_use]
    pub fn view(&self, cmd_id: &str) -> Option<OrderCmdView> {
        if let Some(cmd) = self.inner.live.lock().get(cmd_id) {
            return Some(cmd.view());
        }
        self.inner.history.lock().get(cmd_id).cloned()
    }

    /// Snapshots filtered by source tag and status (`active`, `finished` or
    /// `all`), newest first.
    #[must_use]
    pub fn views(&self, source_tag: Option<&str>, status: Option<&str>) -> Vec<OrderCmdView> {
        let mut views: Vec<OrderCmdView> = {
            let live = self.inner.live.lock();
            let history = self.inner.history.lock();
            history
                .iter()
                .map(|(id, archived)| match live.get(id) {
                    Some(cmd) => cmd.view(),
                    None => archived.clone(),
                })
                .collect()
        };
        if let Some(tag) = source_tag {
            views.retain(|v| v.source_tag == tag);
        }
        match status {
            Some("active") => views.retain(|v| v.status == CmdStatus::Running),
            Some("finished") => views.retain(|v| v.status == CmdStatus::Finished),
            _ => {}
        }
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    /// Number of commands currently being driven
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Number of commands ever registered
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.inner.history.lock().len()
    }
}

impl ExecutorInner {
    fn publish_update(&self, view: OrderCmdView) {
        self.history.lock().insert(view.cmd_id.clone(), view.clone());
        self.bus.publish(TraderEvent::OrderCmd(view));
    }

    fn route_order(&self, order: &OrderData) {
        let now = Utc::now();
        let view = {
            let mut live = self.live.lock();
            let Some(cmd) = live.values_mut().find(|c| c.owns_order(&order.order_id)) else {
                return;
            };
            let before = (cmd.status(), cmd.filled_volume());
            cmd.on_order_update(order, now);
            ((cmd.status(), cmd.filled_volume()) != before).then(|| cmd.view())
        };
        if let Some(view) = view {
            self.publish_update(view);
        }
    }

    fn route_trade(&self, trade: &TradeData) {
        let now = Utc::now();
        let view = {
            let mut live = self.live.lock();
            let Some(cmd) = live.values_mut().find(|c| c.owns_order(&trade.order_id)) else {
                return;
            };
            let before = (cmd.status(), cmd.filled_volume());
            cmd.on_trade(trade, now);
            ((cmd.status(), cmd.filled_volume()) != before).then(|| cmd.view())
        };
        if let Some(view) = view {
            self.publish_update(view);
        }
    }
}

struct ExecutorRouter {
    inner: Arc<ExecutorInner>,
}

#[async_trait]
impl EventHandler for ExecutorRouter {
    async fn handle(&self, event: TraderEvent) -> anyhow::Result<()> {
        match event {
            TraderEvent::Order(order) => self.inner.route_order(&order),
            TraderEvent::Trade(trade) => self.inner.route_trade(&trade),
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "order_cmd_executor"
    }
}

async fn run_loop(inner: Arc<ExecutorInner>) {
    info!("executor loop started");
    let mut ticker = tokio::time::interval(defaults::EXECUTOR_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    while inner.running.load(Ordering::SeqCst) {
        ticker.tick().await;
        let now = Utc::now();
        let paused = inner.engine.is_paused();

        // Phase 1: decide, holding the lock but doing no I/O.
        let mut actions: Vec<(String, CmdAction, i64)> = Vec::new();
        let mut updates: Vec<OrderCmdView> = Vec::new();
        {
            let mut live = inner.live.lock();
            let ids: Vec<String> = live.keys().cloned().collect();
            for cmd_id in ids {
                let Some(cmd) = live.get_mut(&cmd_id) else {
                    continue;
                };
                let before = (cmd.status(), cmd.filled_volume());
                let action = if paused {
                    cmd.tick_paused(now)
                } else {
                    cmd.tick(now)
                };
                if (cmd.status(), cmd.filled_volume()) != before {
                    updates.push(cmd.view());
                }
                if cmd.is_finished() {
                    debug!(cmd_id = %cmd_id, "archiving finished command");
                    live.remove(&cmd_id);
                    continue;
                }
                if let Some(action) = action {
                    let volume = match &action {
                        CmdAction::Submit(req) => req.volume,
                        CmdAction::Cancel(_) => 0,
                    };
                    actions.push((cmd_id, action, volume));
                }
            }
        }

        // Phase 2: perform the decided actions without holding the lock.
        for (cmd_id, action, volume) in actions {
            match action {
                CmdAction::Submit(request) => {
                    match inner.engine.insert_order(request).await {
                        Ok(order) => {
                            let mut live = inner.live.lock();
                            if let Some(cmd) = live.get_mut(&cmd_id) {
                                cmd.on_order_submitted(order.order_id.clone(), Utc::now());
                                // Reconcile against the current snapshot in
                                // case the order resolved before the event
                                // routing caught up; the per-order watermark
                                // keeps this idempotent.
                                if let Some(snapshot) = inner.engine.order(&order.order_id) {
                                    cmd.on_order_update(&snapshot, Utc::now());
                                }
                            }
                        }
                        Err(e) => {
                            error!(cmd_id = %cmd_id, error = %e, "child submission failed");
                            let mut live = inner.live.lock();
                            if let Some(cmd) = live.get_mut(&cmd_id) {
                                cmd.on_submit_failed(volume);
                            }
                        }
                    }
                }
                CmdAction::Cancel(order_id) => {
                    debug!(cmd_id = %cmd_id, order_id = %order_id, "child fill deadline hit");
                    if let Err(e) = inner.engine.cancel_order(&order_id).await {
                        error!(order_id = %order_id, error = %e, "cancel failed");
                    }
                    if let Some(snapshot) = inner.engine.order(&order_id) {
                        let mut live = inner.live.lock();
                        if let Some(cmd) = live.get_mut(&cmd_id) {
                            cmd.on_order_update(&snapshot, Utc::now());
                        }
                    }
                }
            }
        }

        for view in updates {
            inner.publish_update(view);
        }
    }
    info!("executor loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{gateway_channel, Gateway, SimGateway};
    use crate::order_cmd::OrderCmdSpec;
    use qtrader_common::config::{AccountConfig, ContractSeed, GatewayConfig};
    use qtrader_common::types::{Direction, Offset, SplitStrategy, TickData};
    use std::time::Duration;

    struct Fixture {
        executor: OrderCmdExecutor,
        engine: Arc<TradingEngine>,
        sim: Arc<SimGateway>,
        bus: EventBus,
    }

    async fn fixture() -> Fixture {
        let (tx, mut rx) = gateway_channel();
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
        let bus = EventBus::new(256);
        bus.start();
        let engine = Arc::new(TradingEngine::new(&config, gateway, bus.clone()));
        engine.gateway().connect().await.unwrap();

        // Pump gateway events onto the bus, as the trader assembly does.
        let pump_bus = bus.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                use crate::gateway::GatewayEvent;
                match event {
                    GatewayEvent::Order(o) => pump_bus.publish(TraderEvent::Order(o)),
                    GatewayEvent::Trade(t) => pump_bus.publish(TraderEvent::Trade(t)),
                    _ => {}
                }
            }
        });

        let executor = OrderCmdExecutor::new(Arc::clone(&engine), bus.clone());
        executor.start();
        Fixture {
            executor,
            engine,
            sim,
            bus,
        }
    }

    fn tick(price: f64) -> TickData {
        TickData {
            symbol: "rb2505".to_string(),
            exchange: "SHFE".to_string(),
            timestamp: Utc::now(),
            last_price: price,
            bid1: price - 1.0,
            ask1: price + 1.0,
            bid_vol1: 100,
            ask_vol1: 100,
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

    fn spec(volume: i64, max_per: i64) -> OrderCmdSpec {
        OrderCmdSpec {
            symbol: "rb2505".to_string(),
            direction: Direction::Buy,
            offset: Offset::Open,
            volume,
            price: None,
            split_strategy: SplitStrategy::Simple,
            max_volume_per_order: max_per,
            order_interval_seconds: 0.0,
            twap_duration_seconds: None,
            total_timeout_seconds: 30,
            max_retries: 2,
            order_timeout_seconds: 15.0,
        }
    }

    async fn wait_finished(executor: &OrderCmdExecutor, cmd_id: &str) -> OrderCmdView {
        for _ in 0..100 {
            if let Some(view) = executor.view(cmd_id) {
                if view.status == CmdStatus::Finished {
                    return view;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("command {cmd_id} did not finish");
    }

    #[tokio::test]
    async fn test_market_cmd_fills_through_children() {
        let f = fixture().await;
        f.sim.inject_tick(tick(3500.0));

        let cmd = OrderCmd::new(spec(30, 10), "api");
        let cmd_id = f.executor.register(cmd).await;
        let view = wait_finished(&f.executor, &cmd_id).await;

        assert_eq!(view.finish_reason.as_deref(), Some("all_completed"));
        assert_eq!(view.filled_volume, 30);
        assert_eq!(view.all_child_order_ids.len(), 3);
        // Market buys fill at the opposing best quote.
        assert!((view.filled_price - 3501.0).abs() < 1e-6);
        assert_eq!(f.executor.active_count(), 0);
        assert_eq!(f.executor.total_count(), 1);
        f.executor.stop().await;
        f.bus.stop().await;
    }

    #[tokio::test]
    async fn test_close_cancels_resting_child() {
        let f = fixture().await;
        f.sim.inject_tick(tick(3500.0));

        let mut resting = spec(10, 10);
        resting.price = Some(3000.0); // far from the market, never fills
        let cmd = OrderCmd::new(resting, "api");
        let cmd_id = f.executor.register(cmd).await;

        // Give the loop time to submit the child.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.engine.active_orders().len(), 1);

        assert!(f.executor.close(&cmd_id).await);
        let view = wait_finished(&f.executor, &cmd_id).await;
        assert_eq!(view.finish_reason.as_deref(), Some("cancelled"));

        // The resting child was withdrawn on close.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.engine.active_orders().is_empty());
        f.executor.stop().await;
        f.bus.stop().await;
    }

    #[tokio::test]
    async fn test_paused_engine_submits_nothing() {
        let f = fixture().await;
        f.sim.inject_tick(tick(3500.0));
        f.engine.pause();

        let cmd = OrderCmd::new(spec(10, 10), "api");
        let cmd_id = f.executor.register(cmd).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        let view = f.executor.view(&cmd_id).unwrap();
        assert_eq!(view.status, CmdStatus::Running);
        assert!(view.all_child_order_ids.is_empty());
        assert!(f.engine.orders().is_empty());

        // Resume releases the queued volume.
        f.engine.resume();
        let view = wait_finished(&f.executor, &cmd_id).await;
        assert_eq!(view.filled_volume, 10);
        f.executor.stop().await;
        f.bus.stop().await;
    }

    #[tokio::test]
    async fn test_views_filter_by_source_tag() {
        let f = fixture().await;
        f.sim.inject_tick(tick(3500.0));

        let a = f
            .executor
            .register(OrderCmd::new(spec(5, 10), "strategy:s1"))
            .await;
        let _b = f
            .executor
            .register(OrderCmd::new(spec(5, 10), "api"))
            .await;
        wait_finished(&f.executor, &a).await;

        let mine = f.executor.views(Some("strategy:s1"), Some("all"));
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].cmd_id, a);
        assert_eq!(f.executor.views(None, Some("all")).len(), 2);
        f.executor.stop().await;
        f.bus.stop().await;
    }
}
