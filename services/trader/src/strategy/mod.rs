//! Strategy capability: the contract user strategies implement plus the
//! typed parameter record every strategy carries.

pub mod manager;
pub mod signal_follow;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::types::{BarData, OrderData, ParamDefinition, TickData, TradeData};

use crate::order_cmd::OrderCmdSpec;

pub use manager::StrategyManager;
pub use signal_follow::SignalFollowStrategy;

/// Common strategy parameters. Every field is enumerated here so the admin
/// surface can render and edit them without reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyParams {
    /// Primary instrument
    pub symbol: String,
    /// Bar interval string
    pub bar_type: String,
    /// Target lots per entry
    pub volume: i64,
    /// Hard cap on held lots
    pub max_position: i64,
    /// Per-child volume cap handed to order commands
    pub volume_per_order: i64,
    /// Per-child fill deadline, seconds
    pub order_timeout: f64,
    /// Whole-command deadline, seconds
    pub cmd_timeout: u64,
    /// Take-profit ratio; 0 disables
    pub take_profit_pct: f64,
    /// Stop-loss ratio; 0 disables
    pub stop_loss_pct: f64,
    /// Whether positions may be carried overnight
    pub overnight: bool,
    /// Time of day to force-flatten intraday positions
    pub force_exit_time: NaiveTime,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            bar_type: "M1".to_string(),
            volume: 1,
            max_position: 50,
            volume_per_order: 5,
            order_timeout: 10.0,
            cmd_timeout: 300,
            take_profit_pct: 0.0,
            stop_loss_pct: 0.0,
            overnight: false,
            force_exit_time: NaiveTime::from_hms_opt(14, 45, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl StrategyParams {
    /// Build from a free-form config map; unknown keys are rejected so typos
    /// in strategy config surface at load time.
    pub fn from_map(map: &FxHashMap<String, Value>) -> TraderResult<Self> {
        let value = Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        serde_json::from_value(value)
            .map_err(|e| TraderError::Strategy(format!("bad strategy params: {e}")))
    }

    /// Apply a partial update; only known keys change
    pub fn apply(&mut self, updates: &FxHashMap<String, Value>) -> TraderResult<()> {
        let mut current = serde_json::to_value(&*self)
            .map_err(|e| TraderError::Strategy(e.to_string()))?;
        let Value::Object(ref mut fields) = current else {
            return Err(TraderError::Strategy("params not an object".to_string()));
        };
        for (key, value) in updates {
            if !fields.contains_key(key) {
                return Err(TraderError::Strategy(format!("unknown param: {key}")));
            }
            fields.insert(key.clone(), value.clone());
        }
        *self = serde_json::from_value(current)
            .map_err(|e| TraderError::Strategy(format!("bad param value: {e}")))?;
        Ok(())
    }

    /// Typed metadata for the admin surface
    #[must_use]
    pub fn definitions(&self) -> Vec<ParamDefinition> {
        fn def(key: &str, label: &str, kind: &str, value: Value) -> ParamDefinition {
            ParamDefinition {
                key: key.to_string(),
                label: label.to_string(),
                kind: kind.to_string(),
                value,
            }
        }
        vec![
            def("symbol", "instrument", "string", Value::from(self.symbol.clone())),
            def("bar_type", "bar interval", "string", Value::from(self.bar_type.clone())),
            def("volume", "target lots", "int", Value::from(self.volume)),
            def("max_position", "max position", "int", Value::from(self.max_position)),
            def(
                "volume_per_order",
                "lots per child order",
                "int",
                Value::from(self.volume_per_order),
            ),
            def(
                "order_timeout",
                "child order timeout (s)",
                "float",
                Value::from(self.order_timeout),
            ),
            def("cmd_timeout", "command timeout (s)", "int", Value::from(self.cmd_timeout)),
            def(
                "take_profit_pct",
                "take profit ratio",
                "float",
                Value::from(self.take_profit_pct),
            ),
            def(
                "stop_loss_pct",
                "stop loss ratio",
                "float",
                Value::from(self.stop_loss_pct),
            ),
            def("overnight", "hold overnight", "bool", Value::from(self.overnight)),
            def(
                "force_exit_time",
                "forced exit time",
                "time",
                Value::from(self.force_exit_time.format("%H:%M:%S").to_string()),
            ),
        ]
    }
}

/// Externally settable trading signal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Signal {
    /// 1 long, -1 short, 0 flat
    pub side: i32,
    /// Entry price
    pub entry_price: f64,
    /// Entry time
    pub entry_time: Option<chrono::DateTime<chrono::Utc>>,
    /// Entry target lots
    pub entry_volume: i64,
    /// Exit price
    pub exit_price: f64,
    /// Exit time; set marks the signal as an exit
    pub exit_time: Option<chrono::DateTime<chrono::Utc>>,
    /// Why the exit fired
    pub exit_reason: String,
}

/// Contract every strategy implements.
///
/// Tick and bar handlers may produce at most one order-command spec per
/// event; order and trade handlers observe only. Handlers run on the bus
/// dispatch path and must not block.
#[async_trait]
pub trait Strategy: Send {
    /// Reset state for a new trading day and (re)load parameters
    fn init(&mut self, trading_day: NaiveDate) -> TraderResult<()>;

    /// Market tick for the primary symbol
    async fn on_tick(&mut self, tick: &TickData) -> TraderResult<Option<OrderCmdSpec>>;

    /// Completed bar for the primary symbol
    async fn on_bar(&mut self, bar: &BarData) -> TraderResult<Option<OrderCmdSpec>>;

    /// Child order update; observe only
    async fn on_order(&mut self, order: &OrderData) -> TraderResult<()>;

    /// Fill; observe only
    async fn on_trade(&mut self, trade: &TradeData) -> TraderResult<()>;

    /// Current parameters
    fn params(&self) -> &StrategyParams;

    /// Update parameters in memory
    fn update_params(&mut self, updates: &FxHashMap<String, Value>) -> TraderResult<()>;

    /// Terminal result of an order command this strategy issued. The harness
    /// calls this after updating its position tally.
    fn on_cmd_result(&mut self, _view: &qtrader_common::types::OrderCmdView) {}

    /// Current signal, if the strategy exposes one
    fn signal(&self) -> Option<Signal> {
        None
    }

    /// Replace the signal from outside
    fn update_signal(&mut self, _signal: Signal) -> TraderResult<()> {
        Err(TraderError::Strategy(
            "strategy does not accept external signals".to_string(),
        ))
    }
}

/// Factory resolving a strategy `kind` to an instance
pub type StrategyFactory =
    fn(strategy_id: &str, config: &qtrader_common::config::StrategyConfig) -> TraderResult<Box<dyn Strategy>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_from_map_rejects_unknown_keys() {
        let mut map = FxHashMap::default();
        map.insert("symbol".to_string(), json!("rb2505"));
        map.insert("volume".to_string(), json!(3));
        let params = StrategyParams::from_map(&map).unwrap();
        assert_eq!(params.symbol, "rb2505");
        assert_eq!(params.volume, 3);

        let mut updates = FxHashMap::default();
        updates.insert("volme".to_string(), json!(5));
        let err = params.clone().apply(&updates).unwrap_err();
        assert!(err.to_string().contains("unknown param"));
    }

    #[test]
    fn test_params_apply_updates_known_key() {
        let mut params = StrategyParams::default();
        let mut updates = FxHashMap::default();
        updates.insert("volume_per_order".to_string(), json!(8));
        params.apply(&updates).unwrap();
        assert_eq!(params.volume_per_order, 8);
    }

    #[test]
    fn test_definitions_cover_every_field() {
        let params = StrategyParams::default();
        let defs = params.definitions();
        let value = serde_json::to_value(&params).unwrap();
        let field_count = value.as_object().unwrap().len();
        assert_eq!(defs.len(), field_count);
    }
}
