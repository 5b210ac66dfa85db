//! Per-account trader proxy: supervision state machine, connect loop,
//! heartbeat watchdog and the request-forwarding API.
//!
//! State machine: `Stopped → Connecting` on start, `Connecting → Connected`
//! on socket handshake, `Connected → Connecting` on socket drop, any state
//! `→ Stopped` on stop or when the trader process disappears. Transitions
//! are serialized under one mutex and never perform I/O while holding it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use qtrader_common::config::AccountConfig;
use qtrader_common::constants::{defaults, files, push};
use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::event_bus::{EventBus, TraderEvent};
use qtrader_common::process::pid_file_live;
use qtrader_common::types::{
    AccountData, AccountStatusUpdate, JobView, OrderCmdView, OrderData, PositionData,
    StrategyStatus, SystemParam, TickData, TradeData, TraderState, TraderStatusView,
};

use crate::client::{PushMessage, SocketClient};

struct ProxyInner {
    account_id: String,
    config: AccountConfig,
    socket_path: PathBuf,
    pid_path: PathBuf,
    poll_interval: Duration,
    heartbeat_timeout: Duration,

    state: Mutex<TraderState>,
    running: AtomicBool,
    client: SocketClient,
    bus: EventBus,

    last_heartbeat: Mutex<DateTime<Utc>>,
    start_time: Mutex<Option<DateTime<Utc>>>,
    restart_count: AtomicU32,

    child: Mutex<Option<u32>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// In-manager handle to one trader process
#[derive(Clone)]
pub struct TraderProxy {
    inner: Arc<ProxyInner>,
}

impl TraderProxy {
    /// Create a proxy for one account. Pushes republish onto `bus`.
    #[must_use]
    pub fn new(config: AccountConfig, socket_dir: &std::path::Path, bus: EventBus) -> Self {
        Self::with_poll_interval(config, socket_dir, bus, defaults::PROXY_POLL_INTERVAL)
    }

    /// Create a proxy with a custom connect-loop poll interval
    #[must_use]
    pub fn with_poll_interval(
        config: AccountConfig,
        socket_dir: &std::path::Path,
        bus: EventBus,
        poll_interval: Duration,
    ) -> Self {
        let account_id = config.account_id.clone();
        let socket_path = files::socket_path(socket_dir, &account_id);
        let pid_path = files::pid_path(socket_dir, &account_id);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let client = SocketClient::new(socket_path.clone(), push_tx);

        let proxy = Self {
            inner: Arc::new(ProxyInner {
                account_id,
                config,
                socket_path,
                pid_path,
                poll_interval,
                heartbeat_timeout: defaults::HEARTBEAT_TIMEOUT,
                state: Mutex::new(TraderState::Stopped),
                running: AtomicBool::new(false),
                client,
                bus,
                last_heartbeat: Mutex::new(Utc::now()),
                start_time: Mutex::new(None),
                restart_count: AtomicU32::new(0),
                child: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        };
        proxy
            .inner
            .tasks
            .lock()
            .push(tokio::spawn(drain_pushes(Arc::clone(&proxy.inner), push_rx)));
        proxy
    }

    /// Account id this proxy supervises
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.inner.account_id
    }

    /// Current supervision state
    #[must_use]
    pub fn state(&self) -> TraderState {
        *self.inner.state.lock()
    }

    /// Whether the connect loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start supervision: spawn the connect loop (idempotent against both a
    /// running loop and an existing trader process).
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!(account_id = %self.inner.account_id, "proxy already running");
            return false;
        }
        *self.inner.start_time.lock() = Some(Utc::now());
        *self.inner.last_heartbeat.lock() = Utc::now();
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.lock().push(tokio::spawn(connect_loop(inner)));
        info!(account_id = %self.inner.account_id, "proxy started");
        true
    }

    /// Stop supervision from any state
    pub async fn stop(&self) -> bool {
        self.inner.running.store(false, Ordering::SeqCst);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.tasks.lock();
            // The push drain stays alive for reuse; connect loops go.
            guard.drain(1..).collect()
        };
        for task in tasks {
            task.abort();
        }
        self.inner.client.disconnect().await;
        self.inner.set_state(TraderState::Stopped);
        info!(account_id = %self.inner.account_id, "proxy stopped");
        true
    }

    /// Stop, wait briefly, start again
    pub async fn restart(&self) -> bool {
        info!(account_id = %self.inner.account_id, "proxy restarting");
        self.stop().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = self.start();
        if started {
            self.inner.restart_count.fetch_add(1, Ordering::Relaxed);
        }
        started
    }

    /// Supervision status snapshot
    #[must_use]
    pub fn status(&self) -> TraderStatusView {
        TraderStatusView {
            account_id: self.inner.account_id.clone(),
            state: self.state(),
            running: self.is_running(),
            pid: *self.inner.child.lock(),
            start_time: *self.inner.start_time.lock(),
            last_heartbeat: *self.inner.last_heartbeat.lock(),
            restart_count: self.inner.restart_count.load(Ordering::Relaxed),
            socket_path: self.inner.socket_path.display().to_string(),
        }
    }

    /// Generic request forwarding with the default timeout
    pub async fn send_request(
        &self,
        request_type: &str,
        data: Value,
        timeout: Duration,
    ) -> TraderResult<Value> {
        if !self.inner.client.is_connected() {
            return Err(TraderError::Transport(format!(
                "trader {} not connected",
                self.inner.account_id
            )));
        }
        self.inner.client.request(request_type, data, timeout).await
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        request_type: &str,
        data: Value,
    ) -> TraderResult<T> {
        let value = self
            .send_request(request_type, data, defaults::QUERY_TIMEOUT)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| TraderError::Protocol(format!("bad {request_type} response: {e}")))
    }

    /// Live account snapshot; an empty record when the trader is unreachable
    pub async fn get_account(&self) -> AccountData {
        match self.query("get_account", json!({})).await {
            Ok(Some(account)) => account,
            Ok(None) | Err(_) => AccountData::empty(&self.inner.account_id),
        }
    }

    /// One order by id
    pub async fn get_order(&self, order_id: &str) -> Option<OrderData> {
        self.query("get_order", json!({"order_id": order_id}))
            .await
            .ok()
            .flatten()
    }

    /// All orders
    pub async fn get_orders(&self) -> Vec<OrderData> {
        self.query("get_orders", json!({})).await.unwrap_or_default()
    }

    /// Orders still active
    pub async fn get_active_orders(&self) -> Vec<OrderData> {
        self.query("get_active_orders", json!({}))
            .await
            .unwrap_or_default()
    }

    /// One fill by id
    pub async fn get_trade(&self, trade_id: &str) -> Option<TradeData> {
        self.query("get_trade", json!({"trade_id": trade_id}))
            .await
            .ok()
            .flatten()
    }

    /// All fills
    pub async fn get_trades(&self) -> Vec<TradeData> {
        self.query("get_trades", json!({})).await.unwrap_or_default()
    }

    /// All positions
    pub async fn get_positions(&self) -> Vec<PositionData> {
        self.query("get_positions", json!({}))
            .await
            .unwrap_or_default()
    }

    /// Latest quotes
    pub async fn get_quotes(&self) -> Vec<TickData> {
        self.query("get_quotes", json!({})).await.unwrap_or_default()
    }

    /// Scheduled jobs
    pub async fn get_jobs(&self) -> Vec<JobView> {
        self.query("get_jobs", json!({})).await.unwrap_or_default()
    }

    /// Submit a child order; returns the order id
    pub async fn send_order_request(
        &self,
        symbol: &str,
        direction: &str,
        offset: &str,
        volume: i64,
        price: f64,
    ) -> TraderResult<String> {
        let data = json!({
            "symbol": symbol,
            "direction": direction,
            "offset": offset,
            "volume": volume,
            "price": if price > 0.0 { Value::from(price) } else { Value::Null },
        });
        let value = self
            .send_request("order_req", data, defaults::REQUEST_TIMEOUT)
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TraderError::Protocol("order_req returned no id".to_string()))
    }

    /// Cancel a child order
    pub async fn send_cancel_request(&self, order_id: &str) -> TraderResult<bool> {
        let value = self
            .send_request(
                "cancel_req",
                json!({"order_id": order_id}),
                defaults::REQUEST_TIMEOUT,
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Subscribe quote streams on the trader
    pub async fn subscribe(&self, symbols: &[String]) -> TraderResult<bool> {
        let value = self
            .send_request(
                "subscribe",
                json!({"symbols": symbols}),
                defaults::REQUEST_TIMEOUT,
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Ask the trader to connect its gateway
    pub async fn connect_gateway(&self) -> TraderResult<bool> {
        let value = self
            .send_request("connect_gateway", json!({}), defaults::INIT_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Ask the trader to disconnect its gateway
    pub async fn disconnect_gateway(&self) -> TraderResult<bool> {
        let value = self
            .send_request("disconnect_gateway", json!({}), defaults::REQUEST_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Pause trading on the trader
    pub async fn pause(&self) -> TraderResult<bool> {
        let value = self
            .send_request("pause_trading", json!({}), defaults::REQUEST_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Resume trading on the trader
    pub async fn resume(&self) -> TraderResult<bool> {
        let value = self
            .send_request("resume_trading", json!({}), defaults::REQUEST_TIMEOUT)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Round-trip liveness probe; refreshes the heartbeat clock on success
    pub async fn ping(&self) -> bool {
        match self
            .send_request("ping", json!({}), defaults::QUERY_TIMEOUT)
            .await
        {
            Ok(_) => {
                *self.inner.last_heartbeat.lock() = Utc::now();
                true
            }
            Err(_) => false,
        }
    }

    /// Strategy status list
    pub async fn list_strategies(&self) -> Vec<StrategyStatus> {
        self.query("list_strategies", json!({}))
            .await
            .unwrap_or_default()
    }

    /// One strategy's status
    pub async fn get_strategy(&self, strategy_id: &str) -> Option<StrategyStatus> {
        self.query("get_strategy", json!({"strategy_id": strategy_id}))
            .await
            .ok()
            .flatten()
    }

    /// Order-command history of one strategy
    pub async fn get_strategy_order_cmds(
        &self,
        strategy_id: &str,
        status: Option<&str>,
    ) -> Vec<OrderCmdView> {
        self.query(
            "get_strategy_order_cmds",
            json!({"strategy_id": strategy_id, "status": status}),
        )
        .await
        .unwrap_or_default()
    }

    /// System parameters, optionally one group
    pub async fn list_system_params(&self, group: Option<&str>) -> Vec<SystemParam> {
        self.query("list_system_params", json!({"group": group}))
            .await
            .unwrap_or_default()
    }
}

impl ProxyInner {
    /// Serialized state transition; the bus publish happens outside the lock.
    fn set_state(&self, new_state: TraderState) {
        let changed = {
            let mut state = self.state.lock();
            let old_state = *state;
            *state = new_state;
            (old_state != new_state).then_some(old_state)
        };
        if let Some(old_state) = changed {
            info!(
                account_id = %self.account_id,
                from = %old_state,
                to = %new_state,
                "trader state changed"
            );
            self.bus
                .publish(TraderEvent::AccountStatus(AccountStatusUpdate {
                    account_id: self.account_id.clone(),
                    status: new_state,
                    gateway_connected: new_state == TraderState::Connected,
                    trade_paused: false,
                    timestamp: Utc::now(),
                }));
        }
    }

    /// Trader process existence: socket file present, PID file present and
    /// its PID alive.
    fn process_exists(&self) -> bool {
        self.socket_path.exists() && pid_file_live(&self.pid_path)
    }

    fn heartbeat_stale(&self) -> bool {
        let age = Utc::now() - *self.last_heartbeat.lock();
        age.to_std().unwrap_or_default() > self.heartbeat_timeout
    }

    async fn maybe_spawn_trader(&self) {
        if !self.config.auto_spawn {
            return;
        }
        if let Some(pid) = *self.child.lock() {
            if qtrader_common::process::pid_alive(pid as i32) {
                // Spawned recently, still coming up.
                return;
            }
        }
        let exe = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("run_trader")))
            .unwrap_or_else(|| PathBuf::from("run_trader"));
        let mut command = tokio::process::Command::new(exe);
        command.arg("--account-id").arg(&self.account_id);
        if self.config.debug {
            command.arg("--debug");
        }
        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                info!(account_id = %self.account_id, pid = ?pid, "trader subprocess spawned");
                *self.child.lock() = pid;
            }
            Err(e) => {
                error!(account_id = %self.account_id, error = %e, "trader spawn failed");
            }
        }
    }
}

/// The supervision loop: a fixed poll that checks process existence, drives
/// the connection and watches heartbeats.
async fn connect_loop(inner: Arc<ProxyInner>) {
    info!(account_id = %inner.account_id, "connect loop started");
    while inner.running.load(Ordering::SeqCst) {
        // 1. No trader process: report stopped and wait.
        if !inner.process_exists() {
            if inner.client.is_connected() {
                inner.client.disconnect().await;
            }
            inner.set_state(TraderState::Stopped);
            inner.maybe_spawn_trader().await;
            tokio::time::sleep(inner.poll_interval).await;
            continue;
        }

        // 2. Process exists but no socket session: try to connect.
        if !inner.client.is_connected() {
            inner.set_state(TraderState::Connecting);
            match inner.client.connect().await {
                Ok(()) => {
                    *inner.last_heartbeat.lock() = Utc::now();
                    inner.set_state(TraderState::Connected);
                }
                Err(e) => {
                    debug!(account_id = %inner.account_id, error = %e, "connect attempt failed");
                }
            }
            tokio::time::sleep(inner.poll_interval).await;
            continue;
        }

        // 3. Connected: advisory heartbeat out, staleness watchdog in.
        inner.client.send_heartbeat().await;
        if inner.heartbeat_stale() {
            warn!(
                account_id = %inner.account_id,
                "heartbeat silence exceeded timeout, forcing reconnect"
            );
            inner.client.disconnect().await;
            inner.set_state(TraderState::Connecting);
        }
        tokio::time::sleep(inner.poll_interval).await;
    }
    info!(account_id = %inner.account_id, "connect loop exited");
}

/// Demultiplex pushes from the trader onto the manager bus
async fn drain_pushes(inner: Arc<ProxyInner>, mut rx: mpsc::UnboundedReceiver<PushMessage>) {
    while let Some(message) = rx.recv().await {
        if message.msg_type == push::HEARTBEAT {
            *inner.last_heartbeat.lock() = Utc::now();
            continue;
        }
        let event = decode_push(&message);
        match event {
            Some(event) => inner.bus.publish(event),
            None => warn!(
                account_id = %inner.account_id,
                msg_type = %message.msg_type,
                "undecodable push dropped"
            ),
        }
    }
}

fn decode_push(message: &PushMessage) -> Option<TraderEvent> {
    let data = message.data.clone();
    match message.msg_type.as_str() {
        push::ACCOUNT => serde_json::from_value(data).ok().map(TraderEvent::Account),
        push::ORDER => serde_json::from_value(data).ok().map(TraderEvent::Order),
        push::TRADE => serde_json::from_value(data).ok().map(TraderEvent::Trade),
        push::POSITION => serde_json::from_value(data).ok().map(TraderEvent::Position),
        push::ACCOUNT_STATUS => serde_json::from_value(data)
            .ok()
            .map(TraderEvent::AccountStatus),
        push::ORDER_CMD => serde_json::from_value(data).ok().map(TraderEvent::OrderCmd),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(dir: &std::path::Path) -> TraderProxy {
        let bus = EventBus::new(64);
        bus.start();
        let config = AccountConfig {
            account_id: "p1".to_string(),
            enabled: true,
            auto_spawn: false,
            debug: false,
            trading: Default::default(),
            gateway: Default::default(),
            strategies: Default::default(),
        };
        TraderProxy::with_poll_interval(config, dir, bus, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_initial_state_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path());
        assert_eq!(proxy.state(), TraderState::Stopped);
        assert!(!proxy.is_running());
    }

    #[tokio::test]
    async fn test_no_process_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path());
        assert!(proxy.start());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(proxy.state(), TraderState::Stopped);
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path());
        assert!(proxy.start());
        assert!(!proxy.start());
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_requests_fail_cleanly_while_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = proxy(dir.path());
        let err = proxy
            .send_request("ping", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(proxy.get_orders().await.is_empty());
        let account = proxy.get_account().await;
        assert_eq!(account.account_id, "p1");
        assert!(!account.gateway_connected);
    }

    #[tokio::test]
    async fn test_decode_push_known_and_unknown() {
        let message = PushMessage {
            msg_type: "account".to_string(),
            data: serde_json::to_value(AccountData::empty("a1")).unwrap(),
        };
        assert!(matches!(
            decode_push(&message),
            Some(TraderEvent::Account(_))
        ));

        let message = PushMessage {
            msg_type: "tick".to_string(),
            data: json!({}),
        };
        assert!(decode_push(&message).is_none());
    }
}
