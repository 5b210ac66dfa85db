//! Strategy harness: loads strategies, routes bus events to them, mediates
//! their order commands and owns the per-strategy pause flags.
//!
//! Dispatch is symbol-filtered: a strategy only sees events for its primary
//! symbol, and only while enabled and initialized. Strategy-issued commands
//! are stamped `strategy:<id>` and registered with the executor; at most one
//! command per strategy is in flight at a time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use qtrader_common::config::StrategyConfig;
use qtrader_common::constants::topics;
use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::event_bus::{EventBus, EventHandler, TraderEvent};
use qtrader_common::types::{Interval, OrderCmdView, StrategyStatus};

use crate::engine::TradingEngine;
use crate::executor::OrderCmdExecutor;
use crate::order_cmd::{OrderCmd, REASON_REJECTED_PREFIX};

use super::{Signal, SignalFollowStrategy, Strategy, StrategyFactory};

struct StrategyRuntime {
    strategy_id: String,
    config: StrategyConfig,
    strategy: Box<dyn Strategy>,
    enabled: bool,
    inited: bool,
    opening_paused: bool,
    closing_paused: bool,
    pos_volume: i64,
    pos_price: Option<f64>,
    pending_cmd: Option<String>,
}

impl StrategyRuntime {
    fn source_tag(&self) -> String {
        format!("strategy:{}", self.strategy_id)
    }

    fn symbol(&self) -> &str {
        &self.strategy.params().symbol
    }
}

struct Inner {
    engine: Arc<TradingEngine>,
    executor: OrderCmdExecutor,
    bus: EventBus,
    runtimes: tokio::sync::Mutex<FxHashMap<String, StrategyRuntime>>,
}

/// The strategy harness; cheap to clone
#[derive(Clone)]
pub struct StrategyManager {
    inner: Arc<Inner>,
    factories: Arc<FxHashMap<String, StrategyFactory>>,
}

impl StrategyManager {
    /// Create the harness with the built-in strategy kinds registered
    #[must_use]
    pub fn new(engine: Arc<TradingEngine>, executor: OrderCmdExecutor, bus: EventBus) -> Self {
        let mut factories: FxHashMap<String, StrategyFactory> = FxHashMap::default();
        factories.insert("signal_follow".to_string(), SignalFollowStrategy::create);
        Self {
            inner: Arc::new(Inner {
                engine,
                executor,
                bus,
                runtimes: tokio::sync::Mutex::new(FxHashMap::default()),
            }),
            factories: Arc::new(factories),
        }
    }

    /// Add a strategy kind before `start`
    pub fn register_kind(&mut self, kind: impl Into<String>, factory: StrategyFactory) {
        Arc::make_mut(&mut self.factories).insert(kind.into(), factory);
    }

    /// Load strategies from config, subscribe their data, replay the current
    /// day's bars and hook the harness into the bus.
    pub async fn start(
        &self,
        strategies: &FxHashMap<String, StrategyConfig>,
    ) -> TraderResult<()> {
        for (strategy_id, config) in strategies {
            if !config.enabled {
                info!(strategy_id = %strategy_id, "strategy disabled in config, skipped");
                continue;
            }
            match self.load_one(strategy_id, config).await {
                Ok(()) => info!(strategy_id = %strategy_id, kind = %config.kind, "strategy loaded"),
                Err(e) => error!(strategy_id = %strategy_id, error = %e, "strategy load failed"),
            }
        }

        self.replay_all().await;

        let dispatch = Arc::new(StrategyDispatch {
            manager: self.clone(),
        });
        for topic in [
            topics::TICK_UPDATE,
            topics::KLINE_UPDATE,
            topics::ORDER_UPDATE,
            topics::TRADE_CREATED,
            topics::ORDER_CMD_UPDATE,
        ] {
            self.inner.bus.register(topic, dispatch.clone());
        }
        Ok(())
    }

    async fn load_one(&self, strategy_id: &str, config: &StrategyConfig) -> TraderResult<()> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            TraderError::Strategy(format!("unknown strategy kind: {}", config.kind))
        })?;
        let strategy = factory(strategy_id, config)?;
        let symbol = strategy.params().symbol.clone();
        let interval = Interval::parse(&config.bar)
            .ok_or_else(|| TraderError::Strategy(format!("bad bar interval: {}", config.bar)))?;

        self.inner.engine.subscribe_symbols(&[symbol.clone()]).await?;
        self.inner.engine.subscribe_bars(&symbol, interval).await?;

        let runtime = StrategyRuntime {
            strategy_id: strategy_id.to_string(),
            config: config.clone(),
            strategy,
            enabled: true,
            inited: false,
            opening_paused: false,
            closing_paused: false,
            pos_volume: 0,
            pos_price: None,
            pending_cmd: None,
        };
        self.inner
            .runtimes
            .lock()
            .await
            .insert(strategy_id.to_string(), runtime);
        Ok(())
    }

    /// Replay the current trading day into every strategy: trading is paused,
    /// each strategy is re-initialized and fed the day's bars in time order,
    /// then trading resumes.
    pub async fn replay_all(&self) {
        self.inner.engine.pause();
        let trading_day = self.trading_day();
        {
            let mut runtimes = self.inner.runtimes.lock().await;
            for runtime in runtimes.values_mut() {
                if let Err(e) = self.replay_one(runtime, trading_day).await {
                    error!(
                        strategy_id = %runtime.strategy_id,
                        error = %e,
                        "strategy replay failed"
                    );
                }
            }
        }
        self.inner.engine.resume();
    }

    async fn replay_one(
        &self,
        runtime: &mut StrategyRuntime,
        trading_day: NaiveDate,
    ) -> TraderResult<()> {
        runtime.strategy.init(trading_day)?;
        runtime.pos_volume = 0;
        runtime.pos_price = None;
        runtime.pending_cmd = None;

        let interval = Interval::parse(&runtime.config.bar).unwrap_or(Interval::M1);
        let bars = self.inner.engine.kline(runtime.symbol(), interval);
        let count = bars.len();
        for bar in bars {
            // Replay establishes indicator state only; proposals are not traded.
            let _ = runtime.strategy.on_bar(&bar).await?;
        }
        runtime.inited = true;
        info!(
            strategy_id = %runtime.strategy_id,
            bars = count,
            %trading_day,
            "strategy replayed"
        );
        Ok(())
    }

    /// Day rollover: replay every strategy against the new trading day
    pub async fn on_day_rollover(&self) {
        info!("day rollover: replaying all strategies");
        self.replay_all().await;
    }

    /// Status snapshots of every loaded strategy
    pub async fn list_status(&self) -> Vec<StrategyStatus> {
        let runtimes = self.inner.runtimes.lock().await;
        let mut statuses: Vec<StrategyStatus> =
            runtimes.values().map(|r| self.status_of(r)).collect();
        statuses.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        statuses
    }

    /// Status snapshot of one strategy
    pub async fn status(&self, strategy_id: &str) -> Option<StrategyStatus> {
        let runtimes = self.inner.runtimes.lock().await;
        runtimes.get(strategy_id).map(|r| self.status_of(r))
    }

    /// Enable or disable dispatch for one strategy
    pub async fn set_enabled(&self, strategy_id: &str, enabled: bool) -> bool {
        let mut runtimes = self.inner.runtimes.lock().await;
        match runtimes.get_mut(strategy_id) {
            Some(runtime) => {
                runtime.enabled = enabled;
                info!(strategy_id = %strategy_id, enabled, "strategy dispatch toggled");
                true
            }
            None => false,
        }
    }

    /// Enable or disable every strategy
    pub async fn set_all_enabled(&self, enabled: bool) -> bool {
        let mut runtimes = self.inner.runtimes.lock().await;
        for runtime in runtimes.values_mut() {
            runtime.enabled = enabled;
        }
        info!(enabled, count = runtimes.len(), "all strategies toggled");
        true
    }

    /// Re-run one strategy's init for the current trading day
    pub async fn init_strategy(&self, strategy_id: &str) -> TraderResult<()> {
        let trading_day = self.trading_day();
        let mut runtimes = self.inner.runtimes.lock().await;
        let runtime = runtimes
            .get_mut(strategy_id)
            .ok_or_else(|| TraderError::Strategy(format!("unknown strategy: {strategy_id}")))?;
        runtime.strategy.init(trading_day)?;
        runtime.pos_volume = 0;
        runtime.pos_price = None;
        runtime.pending_cmd = None;
        runtime.inited = true;
        Ok(())
    }

    /// Update one strategy's parameters in memory
    pub async fn update_params(
        &self,
        strategy_id: &str,
        updates: &FxHashMap<String, Value>,
    ) -> TraderResult<()> {
        let mut runtimes = self.inner.runtimes.lock().await;
        let runtime = runtimes
            .get_mut(strategy_id)
            .ok_or_else(|| TraderError::Strategy(format!("unknown strategy: {strategy_id}")))?;
        runtime.strategy.update_params(updates)
    }

    /// Reload one strategy's parameters from its config record
    pub async fn reload_params(&self, strategy_id: &str) -> TraderResult<()> {
        let mut runtimes = self.inner.runtimes.lock().await;
        let runtime = runtimes
            .get_mut(strategy_id)
            .ok_or_else(|| TraderError::Strategy(format!("unknown strategy: {strategy_id}")))?;
        let params = runtime.config.params.clone();
        runtime.strategy.update_params(&params)
    }

    /// Replace one strategy's signal
    pub async fn update_signal(&self, strategy_id: &str, signal: Signal) -> TraderResult<()> {
        let mut runtimes = self.inner.runtimes.lock().await;
        let runtime = runtimes
            .get_mut(strategy_id)
            .ok_or_else(|| TraderError::Strategy(format!("unknown strategy: {strategy_id}")))?;
        runtime.strategy.update_signal(signal)
    }

    /// Set the opening/closing pause flags
    pub async fn set_trading_status(
        &self,
        strategy_id: &str,
        opening_paused: Option<bool>,
        closing_paused: Option<bool>,
    ) -> TraderResult<(bool, bool)> {
        let mut runtimes = self.inner.runtimes.lock().await;
        let runtime = runtimes
            .get_mut(strategy_id)
            .ok_or_else(|| TraderError::Strategy(format!("unknown strategy: {strategy_id}")))?;
        if let Some(paused) = opening_paused {
            runtime.opening_paused = paused;
        }
        if let Some(paused) = closing_paused {
            runtime.closing_paused = paused;
        }
        info!(
            strategy_id = %strategy_id,
            opening_paused = runtime.opening_paused,
            closing_paused = runtime.closing_paused,
            "strategy trading status set"
        );
        Ok((runtime.opening_paused, runtime.closing_paused))
    }

    /// Order-command history of one strategy
    pub async fn order_cmds(&self, strategy_id: &str, status: Option<&str>) -> Vec<OrderCmdView> {
        let tag = format!("strategy:{strategy_id}");
        self.inner.executor.views(Some(&tag), status)
    }

    fn status_of(&self, runtime: &StrategyRuntime) -> StrategyStatus {
        let trading_status = match &runtime.pending_cmd {
            Some(cmd_id) => match self.inner.executor.view(cmd_id) {
                Some(view) if view.status != qtrader_common::types::CmdStatus::Finished => {
                    if view.offset.is_close() {
                        "closing".to_string()
                    } else {
                        "opening".to_string()
                    }
                }
                _ => String::new(),
            },
            None => String::new(),
        };
        StrategyStatus {
            strategy_id: runtime.strategy_id.clone(),
            kind: runtime.config.kind.clone(),
            symbol: runtime.symbol().to_string(),
            bar: runtime.config.bar.clone(),
            enabled: runtime.enabled,
            inited: runtime.inited,
            opening_paused: runtime.opening_paused,
            closing_paused: runtime.closing_paused,
            pos_volume: runtime.pos_volume,
            pos_price: runtime.pos_price,
            trading_status,
            params: runtime.strategy.params().definitions(),
            signal: runtime
                .strategy
                .signal()
                .and_then(|s| serde_json::to_value(s).ok()),
        }
    }

    fn trading_day(&self) -> NaiveDate {
        NaiveDate::parse_from_str(&self.inner.engine.trading_day(), "%Y%m%d")
            .unwrap_or_else(|_| chrono::Utc::now().date_naive())
    }

    async fn submit_cmd(&self, runtime: &mut StrategyRuntime, spec: crate::order_cmd::OrderCmdSpec) {
        if let Some(cmd_id) = &runtime.pending_cmd {
            debug!(
                strategy_id = %runtime.strategy_id,
                pending = %cmd_id,
                "command in flight, proposal skipped"
            );
            return;
        }
        if spec.offset.is_close() && runtime.closing_paused {
            warn!(strategy_id = %runtime.strategy_id, "closing paused, proposal blocked");
            return;
        }
        if !spec.offset.is_close() && runtime.opening_paused {
            warn!(strategy_id = %runtime.strategy_id, "opening paused, proposal blocked");
            return;
        }
        let cmd = OrderCmd::new(spec, runtime.source_tag());
        let cmd_id = self.inner.executor.register(cmd).await;
        info!(
            strategy_id = %runtime.strategy_id,
            cmd_id = %cmd_id,
            "strategy order command submitted"
        );
        runtime.pending_cmd = Some(cmd_id);
    }

    async fn handle_cmd_update(&self, view: &OrderCmdView) {
        let Some(strategy_id) = view.source_tag.strip_prefix("strategy:") else {
            return;
        };
        if view.status != qtrader_common::types::CmdStatus::Finished {
            return;
        }
        let mut runtimes = self.inner.runtimes.lock().await;
        let Some(runtime) = runtimes.get_mut(strategy_id) else {
            return;
        };
        if runtime.pending_cmd.as_deref() != Some(view.cmd_id.as_str()) {
            return;
        }
        runtime.pending_cmd = None;
        if view.offset.is_close() {
            runtime.pos_volume -= view.filled_volume;
            if runtime.pos_volume <= 0 {
                runtime.pos_price = None;
            }
        } else {
            runtime.pos_volume += view.filled_volume;
            if view.filled_volume > 0 {
                runtime.pos_price = Some(view.filled_price);
            }
        }
        runtime.strategy.on_cmd_result(view);

        if let Some(reason) = &view.finish_reason {
            if reason.starts_with(REASON_REJECTED_PREFIX) {
                if view.offset.is_close() {
                    runtime.closing_paused = true;
                } else {
                    runtime.opening_paused = true;
                }
                warn!(
                    strategy_id = %strategy_id,
                    reason = %reason,
                    "command rejected, matching side paused"
                );
            }
        }
        debug!(
            strategy_id = %strategy_id,
            pos = runtime.pos_volume,
            "strategy position tallied"
        );
    }
}

struct StrategyDispatch {
    manager: StrategyManager,
}

#[async_trait]
impl EventHandler for StrategyDispatch {
    async fn handle(&self, event: TraderEvent) -> anyhow::Result<()> {
        match event {
            TraderEvent::Tick(tick) => {
                let inner = &self.manager.inner;
                let mut runtimes = inner.runtimes.lock().await;
                let mut proposals = Vec::new();
                for runtime in runtimes.values_mut() {
                    if !runtime.enabled || !runtime.inited || runtime.symbol() != tick.symbol {
                        continue;
                    }
                    match runtime.strategy.on_tick(&tick).await {
                        Ok(Some(spec)) => proposals.push((runtime.strategy_id.clone(), spec)),
                        Ok(None) => {}
                        Err(e) => {
                            error!(strategy_id = %runtime.strategy_id, error = %e, "on_tick failed");
                        }
                    }
                }
                for (strategy_id, spec) in proposals {
                    if let Some(runtime) = runtimes.get_mut(&strategy_id) {
                        self.manager.submit_cmd(runtime, spec).await;
                    }
                }
            }
            TraderEvent::Bar(bar) => {
                let inner = &self.manager.inner;
                let mut runtimes = inner.runtimes.lock().await;
                let mut proposals = Vec::new();
                for runtime in runtimes.values_mut() {
                    if !runtime.enabled || !runtime.inited || runtime.symbol() != bar.symbol {
                        continue;
                    }
                    match runtime.strategy.on_bar(&bar).await {
                        Ok(Some(spec)) => proposals.push((runtime.strategy_id.clone(), spec)),
                        Ok(None) => {}
                        Err(e) => {
                            error!(strategy_id = %runtime.strategy_id, error = %e, "on_bar failed");
                        }
                    }
                }
                for (strategy_id, spec) in proposals {
                    if let Some(runtime) = runtimes.get_mut(&strategy_id) {
                        self.manager.submit_cmd(runtime, spec).await;
                    }
                }
            }
            TraderEvent::Order(order) => {
                let mut runtimes = self.manager.inner.runtimes.lock().await;
                for runtime in runtimes.values_mut() {
                    if runtime.enabled && runtime.inited && runtime.symbol() == order.symbol {
                        if let Err(e) = runtime.strategy.on_order(&order).await {
                            error!(strategy_id = %runtime.strategy_id, error = %e, "on_order failed");
                        }
                    }
                }
            }
            TraderEvent::Trade(trade) => {
                let mut runtimes = self.manager.inner.runtimes.lock().await;
                for runtime in runtimes.values_mut() {
                    if runtime.enabled && runtime.inited && runtime.symbol() == trade.symbol {
                        if let Err(e) = runtime.strategy.on_trade(&trade).await {
                            error!(strategy_id = %runtime.strategy_id, error = %e, "on_trade failed");
                        }
                    }
                }
            }
            TraderEvent::OrderCmd(view) => {
                self.manager.handle_cmd_update(&view).await;
            }
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "strategy_manager"
    }
}
