//! Shared constants: bus topics, push types and default tunables

/// Event bus topic names
pub mod topics {
    /// Account snapshot changed
    pub const ACCOUNT_UPDATE: &str = "account.update";
    /// Gateway / supervision state changed
    pub const ACCOUNT_STATUS: &str = "account.status";
    /// Position changed
    pub const POSITION_UPDATE: &str = "position.update";
    /// Child order changed
    pub const ORDER_UPDATE: &str = "order.update";
    /// Fill created
    pub const TRADE_CREATED: &str = "trade.created";
    /// Market tick
    pub const TICK_UPDATE: &str = "tick.update";
    /// Completed bar
    pub const KLINE_UPDATE: &str = "kline.update";
    /// Compound order command changed
    pub const ORDER_CMD_UPDATE: &str = "order_cmd.update";
    /// Component error surfaced for observers
    pub const SYSTEM_ERROR: &str = "system.error";
}

/// `msg_type` values of push frames the manager forwards.
/// Ticks are deliberately absent: too high volume for the IPC channel.
pub mod push {
    /// Account snapshot
    pub const ACCOUNT: &str = "account";
    /// Child order
    pub const ORDER: &str = "order";
    /// Fill
    pub const TRADE: &str = "trade";
    /// Position
    pub const POSITION: &str = "position";
    /// Liveness beacon
    pub const HEARTBEAT: &str = "heartbeat";
    /// Connection state change
    pub const ACCOUNT_STATUS: &str = "account.status";
    /// Compound order command
    pub const ORDER_CMD: &str = "order_cmd";
}

/// Default timeouts and intervals
pub mod defaults {
    use std::time::Duration;

    /// Default request timeout
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// Timeout for trivial snapshot queries
    pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
    /// Timeout for connect / strategy-init flows
    pub const INIT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Server-side heartbeat emission interval
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
    /// Proxy declares the connection dead after this heartbeat silence
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Proxy connect-loop poll interval
    pub const PROXY_POLL_INTERVAL: Duration = Duration::from_secs(5);
    /// Order-command executor iteration interval
    pub const EXECUTOR_TICK: Duration = Duration::from_millis(100);
    /// Grace period for draining tasks on shutdown
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

    /// Event bus queue capacity per topic
    pub const BUS_CAPACITY: usize = 1000;
    /// Tick topic gets a deeper queue before drops kick in
    pub const BUS_TICK_CAPACITY: usize = 8192;

    /// Socket directory when none is configured
    pub const SOCKET_DIR: &str = "./data/socks";
    /// Trading-day anchor for minute bars (Chinese futures day session open)
    pub const DAY_ANCHOR: (u32, u32) = (9, 30);
}

/// File names under the socket directory
pub mod files {
    /// Unix socket path for one account
    #[must_use]
    pub fn socket_path(socket_dir: &std::path::Path, account_id: &str) -> std::path::PathBuf {
        socket_dir.join(format!("qtrader_{account_id}.sock"))
    }

    /// PID file path for one account
    #[must_use]
    pub fn pid_path(socket_dir: &std::path::Path, account_id: &str) -> std::path::PathBuf {
        socket_dir.join(format!("qtrader_{account_id}.pid"))
    }
}
