//! Trader process assembly: wires the bus, gateway, executor, strategies and
//! IPC server together for one account, and owns the ordered shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveTime;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use qtrader_common::config::AccountConfig;
use qtrader_common::constants::files;
use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::event_bus::{EventBus, TraderEvent};
use qtrader_common::process::{acquire_pid_file, release_pid_file};
use qtrader_common::types::{AccountStatusUpdate, TraderState};

use crate::engine::TradingEngine;
use crate::executor::OrderCmdExecutor;
use crate::gateway::{gateway_channel, Gateway, GatewayEvent, GatewayEventReceiver, SimGateway};
use crate::handlers::{register_all, HandlerContext};
use crate::ipc::IpcServer;
use crate::params::SystemParamStore;
use crate::scheduler::TaskScheduler;
use crate::strategy::StrategyManager;

/// Local time at which the day-rollover job replays strategies
const DAY_ROLLOVER_AT: (u32, u32) = (20, 30);

/// One account's trader process
pub struct Trader {
    account_id: String,
    pid_path: PathBuf,
    bus: EventBus,
    engine: Arc<TradingEngine>,
    executor: OrderCmdExecutor,
    strategies: StrategyManager,
    ipc: IpcServer,
    scheduler: TaskScheduler,
    pump_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Trader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trader")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl Trader {
    /// Bring the trader up: take the PID lock, assemble every component,
    /// open the IPC server and start the gateway connect in the background.
    pub async fn start(config: AccountConfig, socket_dir: PathBuf) -> TraderResult<Self> {
        let account_id = config.account_id.clone();
        let pid_path = files::pid_path(&socket_dir, &account_id);
        let socket_path = files::socket_path(&socket_dir, &account_id);

        // Single-instance lock; a live holder is fatal.
        acquire_pid_file(&pid_path)?;
        info!(account_id = %account_id, pid = std::process::id(), "pid lock taken");

        let bus = EventBus::default();
        bus.start();

        let (gateway_tx, gateway_rx) = gateway_channel();
        let gateway: Arc<dyn Gateway> = match config.gateway.kind.as_str() {
            "sim" => Arc::new(SimGateway::new(
                &account_id,
                config.gateway.clone(),
                gateway_tx,
            )),
            other => {
                release_pid_file(&pid_path);
                return Err(TraderError::Lifecycle(format!(
                    "unknown gateway kind: {other}"
                )));
            }
        };

        let engine = Arc::new(TradingEngine::new(&config, gateway, bus.clone()));
        let pump_task = Some(tokio::spawn(pump_gateway_events(
            gateway_rx,
            bus.clone(),
            Arc::clone(&engine),
        )));

        let executor = OrderCmdExecutor::new(Arc::clone(&engine), bus.clone());
        executor.start();

        let strategies = StrategyManager::new(Arc::clone(&engine), executor.clone(), bus.clone());
        if let Err(e) = strategies.start(&config.strategies).await {
            release_pid_file(&pid_path);
            return Err(e);
        }

        let params = Arc::new(SystemParamStore::new());
        let scheduler = TaskScheduler::new();
        {
            let strategies = strategies.clone();
            let (hour, minute) = DAY_ROLLOVER_AT;
            let at = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
            scheduler.add_daily("day_rollover", at, move || {
                let strategies = strategies.clone();
                async move {
                    strategies.on_day_rollover().await;
                }
            });
        }
        scheduler.start();

        let ipc = IpcServer::new(socket_path);
        register_all(
            &ipc,
            HandlerContext {
                engine: Arc::clone(&engine),
                executor: executor.clone(),
                strategies: strategies.clone(),
                params,
                scheduler: scheduler.clone(),
            },
        );
        if let Err(e) = ipc.start(&bus) {
            release_pid_file(&pid_path);
            return Err(e);
        }

        engine.connect();
        info!(account_id = %account_id, "trader started");

        Ok(Self {
            account_id,
            pid_path,
            bus,
            engine,
            executor,
            strategies,
            ipc,
            scheduler,
            pump_task,
        })
    }

    /// Account id this trader serves
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// The trading engine (exposed for tests and embedding)
    #[must_use]
    pub fn engine(&self) -> &Arc<TradingEngine> {
        &self.engine
    }

    /// The strategy harness
    #[must_use]
    pub fn strategies(&self) -> &StrategyManager {
        &self.strategies
    }

    /// Ordered shutdown: stop taking requests, drain the executor, stop the
    /// strategies and gateway, stop the bus, then release the files.
    pub async fn shutdown(mut self) {
        info!(account_id = %self.account_id, "trader shutting down");
        self.ipc.stop().await;
        self.executor.stop().await;
        self.strategies.set_all_enabled(false).await;
        self.scheduler.stop();
        if let Err(e) = self.engine.disconnect().await {
            warn!(error = %e, "gateway disconnect failed");
        }
        if let Some(pump) = self.pump_task.take() {
            pump.abort();
        }
        self.bus.stop().await;
        release_pid_file(&self.pid_path);
        info!(account_id = %self.account_id, "trader stopped");
    }
}

/// Drain the gateway queue onto the bus. This is the single seam between
/// gateway-side I/O and the cooperative loop: bus handlers never run on the
/// gateway's path.
async fn pump_gateway_events(
    mut rx: GatewayEventReceiver,
    bus: EventBus,
    engine: Arc<TradingEngine>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            GatewayEvent::Tick(tick) => bus.publish(TraderEvent::Tick(tick)),
            GatewayEvent::Bar(bar) => bus.publish(TraderEvent::Bar(bar)),
            GatewayEvent::Order(order) => bus.publish(TraderEvent::Order(order)),
            GatewayEvent::Trade(trade) => bus.publish(TraderEvent::Trade(trade)),
            GatewayEvent::Position(position) => bus.publish(TraderEvent::Position(position)),
            GatewayEvent::Account(account) => bus.publish(TraderEvent::Account(account)),
            GatewayEvent::Contract(_) => {}
            GatewayEvent::Status { connected, at } => {
                bus.publish(TraderEvent::AccountStatus(AccountStatusUpdate {
                    account_id: engine.account_id().to_string(),
                    status: if connected {
                        TraderState::Connected
                    } else {
                        TraderState::Connecting
                    },
                    gateway_connected: connected,
                    trade_paused: engine.is_paused(),
                    timestamp: at,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtrader_common::config::{ContractSeed, GatewayConfig};
    use qtrader_common::process::read_pid_file;

    fn config(account_id: &str) -> AccountConfig {
        AccountConfig {
            account_id: account_id.to_string(),
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
        }
    }

    #[tokio::test]
    async fn test_start_creates_files_and_shutdown_removes_them() {
        let dir = tempfile::tempdir().unwrap();
        let socket_dir = dir.path().to_path_buf();
        let trader = Trader::start(config("t1"), socket_dir.clone()).await.unwrap();

        let pid_path = files::pid_path(&socket_dir, "t1");
        let socket_path = files::socket_path(&socket_dir, "t1");
        assert_eq!(read_pid_file(&pid_path), Some(std::process::id() as i32));
        assert!(socket_path.exists());

        trader.shutdown().await;
        assert!(!pid_path.exists());
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_second_instance_refused_while_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let socket_dir = dir.path().to_path_buf();
        let trader = Trader::start(config("t2"), socket_dir.clone()).await.unwrap();

        let err = Trader::start(config("t2"), socket_dir.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "lifecycle");

        trader.shutdown().await;
        // With the lock released a fresh start succeeds.
        let trader = Trader::start(config("t2"), socket_dir).await.unwrap();
        trader.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_gateway_kind_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config("t3");
        bad.gateway.kind = "ctp".to_string();
        let err = Trader::start(bad, dir.path().to_path_buf()).await.unwrap_err();
        assert_eq!(err.kind(), "lifecycle");
        // The failed start released its lock.
        assert!(!files::pid_path(dir.path(), "t3").exists());
    }
}
