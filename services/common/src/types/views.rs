//! Read-only view records crossing the IPC boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{CmdStatus, Direction, Offset, SplitStrategy, TraderState};

/// Snapshot of a compound order command, safe to hand to other components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCmdView {
    /// Command id
    pub cmd_id: String,
    /// Originator tag, e.g. `strategy:<id>` or `api`
    pub source_tag: String,
    /// Instrument code
    pub symbol: String,
    /// Buy or sell
    pub direction: Direction,
    /// Open/close flag
    pub offset: Offset,
    /// Target volume of the parent intent
    pub target_volume: i64,
    /// Limit price; `None` means market
    pub limit_price: Option<f64>,
    /// Splitting policy
    pub split_strategy: SplitStrategy,
    /// Lifecycle state
    pub status: CmdStatus,
    /// Terminal reason, set once finished
    pub finish_reason: Option<String>,
    /// Filled volume across all children
    pub filled_volume: i64,
    /// Volume-weighted average fill price
    pub filled_price: f64,
    /// Volume awaiting resubmission after a child timeout
    pub pending_retry_volume: i64,
    /// Ids of every child order submitted so far
    pub all_child_order_ids: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time the executor started driving the command
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time
    pub finished_at: Option<DateTime<Utc>>,
}

impl OrderCmdView {
    /// Volume still to be filled
    #[must_use]
    pub const fn remaining_volume(&self) -> i64 {
        self.target_volume - self.filled_volume
    }
}

/// Typed parameter metadata emitted by a strategy's parameter record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDefinition {
    /// Field key
    pub key: String,
    /// Display label
    pub label: String,
    /// Value type: `int`, `float`, `bool`, `time` or `string`
    pub kind: String,
    /// Current value
    pub value: Value,
}

/// Administrative snapshot of one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStatus {
    /// Strategy id
    pub strategy_id: String,
    /// Strategy type name
    pub kind: String,
    /// Primary symbol
    pub symbol: String,
    /// Bar interval string
    pub bar: String,
    /// Whether dispatch is enabled
    pub enabled: bool,
    /// Whether init has completed for the current trading day
    pub inited: bool,
    /// Opening orders blocked
    pub opening_paused: bool,
    /// Closing orders blocked
    pub closing_paused: bool,
    /// Net lots held by the strategy
    pub pos_volume: i64,
    /// Average holding price, if any lots are held
    pub pos_price: Option<f64>,
    /// `opening`, `closing` or empty when no command is in flight
    pub trading_status: String,
    /// Parameter metadata
    pub params: Vec<ParamDefinition>,
    /// Current signal, if any
    pub signal: Option<Value>,
}

/// Account connection state change pushed by the trader or the proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatusUpdate {
    /// Account id
    pub account_id: String,
    /// Supervision / gateway state
    pub status: TraderState,
    /// Whether the upstream gateway session is live
    pub gateway_connected: bool,
    /// Whether trading is administratively paused
    pub trade_paused: bool,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

/// Scheduled job snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    /// Job name
    pub name: String,
    /// Whether the job will fire
    pub enabled: bool,
    /// Next scheduled run
    pub next_run: Option<DateTime<Utc>>,
    /// Last completed run
    pub last_run: Option<DateTime<Utc>>,
}

/// Key-value system parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemParam {
    /// Parameter key
    pub key: String,
    /// Parameter value (stringly typed, as stored)
    pub value: String,
    /// Parameter group
    pub group: String,
    /// Description shown in admin surfaces
    pub description: String,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Supervision status of one trader as reported by its proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderStatusView {
    /// Account id
    pub account_id: String,
    /// Supervision state
    pub state: TraderState,
    /// Whether the connect loop is running
    pub running: bool,
    /// PID of a subprocess spawned by the proxy, if any
    pub pid: Option<u32>,
    /// Time the proxy was started
    pub start_time: Option<DateTime<Utc>>,
    /// Last heartbeat seen from the trader
    pub last_heartbeat: DateTime<Utc>,
    /// Number of restarts performed
    pub restart_count: u32,
    /// Socket path of the trader's IPC server
    pub socket_path: String,
}
