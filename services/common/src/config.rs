//! Configuration records.
//!
//! Loading these from a file is the caller's concern; every record carries
//! serde derives and sensible defaults so any front end can deserialize them.

use std::path::PathBuf;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::defaults;

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Socket directory settings
    #[serde(default)]
    pub socket: SocketConfig,
    /// Per-account configurations
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl AppConfig {
    /// Look up the configuration of one account
    #[must_use]
    pub fn account(&self, account_id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.account_id == account_id)
    }
}

/// Where socket and PID files live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Directory holding `qtrader_<account>.sock` / `.pid`
    pub socket_dir: PathBuf,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(defaults::SOCKET_DIR),
        }
    }
}

/// Configuration of one trading account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account id
    pub account_id: String,
    /// Whether the manager starts this account's proxy
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the proxy spawns a trader subprocess when none is running
    #[serde(default)]
    pub auto_spawn: bool,
    /// Pass `--debug` to a spawned trader
    #[serde(default)]
    pub debug: bool,
    /// Trading controls
    #[serde(default)]
    pub trading: TradingConfig,
    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Strategies to load, keyed by strategy id
    #[serde(default)]
    pub strategies: FxHashMap<String, StrategyConfig>,
}

/// Trading controls for one account
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TradingConfig {
    /// Start with trading paused
    #[serde(default)]
    pub paused: bool,
    /// Pre-trade risk limits
    #[serde(default)]
    pub risk: RiskConfig,
}

/// Pre-trade risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Daily order submission cap
    pub max_daily_orders: u32,
    /// Daily cancel cap
    pub max_daily_cancels: u32,
    /// Per-order volume cap
    pub max_order_volume: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_orders: 500,
            max_daily_cancels: 500,
            max_order_volume: 100,
        }
    }
}

/// Gateway adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Adapter kind; `sim` is the built-in paper gateway
    pub kind: String,
    /// Synthetic feed interval for the paper gateway; `None` disables it
    #[serde(default)]
    pub feed_interval_ms: Option<u64>,
    /// Contracts seeded into the paper gateway's reference data
    #[serde(default)]
    pub contracts: Vec<ContractSeed>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: "sim".to_string(),
            feed_interval_ms: None,
            contracts: Vec::new(),
        }
    }
}

/// Minimal contract seed for the paper gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSeed {
    /// Instrument code
    pub symbol: String,
    /// Exchange id
    pub exchange: String,
    /// Initial reference price
    pub price: f64,
    /// Minimum price increment
    #[serde(default = "default_price_tick")]
    pub price_tick: f64,
}

/// Configuration of one strategy instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Strategy type name resolved by the harness registry
    pub kind: String,
    /// Primary symbol
    pub symbol: String,
    /// Bar interval string ("M1", "M5", ...)
    #[serde(default = "default_bar")]
    pub bar: String,
    /// Whether the strategy is loaded at startup
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Free-form parameter record validated by the strategy
    #[serde(default)]
    pub params: FxHashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

fn default_bar() -> String {
    "M1".to_string()
}

fn default_price_tick() -> f64 {
    1.0
}
