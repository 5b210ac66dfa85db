//! Shared foundation of the qtrader runtime: canonical data model, IPC wire
//! protocol and the in-process event bus used by both the manager and the
//! per-account trader processes.

pub mod config;
pub mod constants;
pub mod errors;
pub mod event_bus;
pub mod process;
pub mod protocol;
pub mod types;

pub use config::{AccountConfig, AppConfig, GatewayConfig, RiskConfig, SocketConfig,
    StrategyConfig, TradingConfig};
pub use errors::{TraderError, TraderResult};
pub use event_bus::{EventBus, EventHandler, TraderEvent};
pub use protocol::WireFrame;
pub use types::*;
