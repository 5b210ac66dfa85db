//! Per-account trader process: gateway adapter, tick-to-bar resampling,
//! compound order commands with split/retry supervision, strategy harness
//! and the IPC server the manager connects to.

pub mod bars;
pub mod engine;
pub mod executor;
pub mod gateway;
pub mod handlers;
pub mod ipc;
pub mod order_cmd;
pub mod params;
pub mod risk;
pub mod scheduler;
pub mod strategy;
pub mod trader;

pub use engine::TradingEngine;
pub use executor::OrderCmdExecutor;
pub use gateway::{Gateway, GatewayEvent, SimGateway};
pub use order_cmd::{CmdAction, OrderCmd, OrderCmdSpec};
pub use strategy::{Strategy, StrategyManager};
pub use trader::Trader;
