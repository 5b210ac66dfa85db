//! Signal-following strategy: trades whatever signal the admin surface sets.
//!
//! No indicator logic lives here; entries and exits are driven entirely by
//! the externally supplied [`Signal`]. On each bar the strategy compares the
//! signal with its held position and proposes one order command closing the
//! gap: entries open toward `params.volume`, an exit flattens the book.

use async_trait::async_trait;
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info};

use qtrader_common::config::StrategyConfig;
use qtrader_common::errors::TraderResult;
use qtrader_common::types::{
    BarData, Direction, Offset, OrderCmdView, OrderData, SplitStrategy, TickData, TradeData,
};

use crate::order_cmd::OrderCmdSpec;

use super::{Signal, Strategy, StrategyParams};

/// Strategy driven by an externally set signal
pub struct SignalFollowStrategy {
    strategy_id: String,
    params: StrategyParams,
    signal: Option<Signal>,
    pos_volume: i64,
}

impl SignalFollowStrategy {
    /// Factory registered under the `signal_follow` kind
    pub fn create(strategy_id: &str, config: &StrategyConfig) -> TraderResult<Box<dyn Strategy>> {
        let mut params = StrategyParams::from_map(&config.params)?;
        if params.symbol.is_empty() {
            params.symbol = config.symbol.clone();
        }
        if params.bar_type.is_empty() {
            params.bar_type = config.bar.clone();
        }
        Ok(Box::new(Self {
            strategy_id: strategy_id.to_string(),
            params,
            signal: None,
            pos_volume: 0,
        }))
    }

    fn spec(&self, direction: Direction, offset: Offset, volume: i64) -> OrderCmdSpec {
        OrderCmdSpec {
            symbol: self.params.symbol.clone(),
            direction,
            offset,
            volume,
            price: None,
            split_strategy: SplitStrategy::Simple,
            max_volume_per_order: self.params.volume_per_order,
            order_interval_seconds: 0.5,
            twap_duration_seconds: None,
            total_timeout_seconds: self.params.cmd_timeout,
            max_retries: 3,
            order_timeout_seconds: self.params.order_timeout,
        }
    }

    fn decide(&self) -> Option<OrderCmdSpec> {
        let signal = self.signal.as_ref()?;
        if signal.side == 0 {
            return None;
        }
        if signal.exit_time.is_some() {
            if self.pos_volume > 0 {
                let direction = if signal.side == 1 {
                    Direction::Sell
                } else {
                    Direction::Buy
                };
                return Some(self.spec(direction, Offset::Close, self.pos_volume));
            }
            return None;
        }
        let target = self.params.volume.min(self.params.max_position);
        if self.pos_volume < target {
            let direction = if signal.side == 1 {
                Direction::Buy
            } else {
                Direction::Sell
            };
            return Some(self.spec(direction, Offset::Open, target - self.pos_volume));
        }
        None
    }
}

#[async_trait]
impl Strategy for SignalFollowStrategy {
    fn init(&mut self, trading_day: NaiveDate) -> TraderResult<()> {
        info!(strategy_id = %self.strategy_id, %trading_day, "strategy init");
        self.signal = None;
        self.pos_volume = 0;
        Ok(())
    }

    async fn on_tick(&mut self, _tick: &TickData) -> TraderResult<Option<OrderCmdSpec>> {
        Ok(None)
    }

    async fn on_bar(&mut self, bar: &BarData) -> TraderResult<Option<OrderCmdSpec>> {
        debug!(
            strategy_id = %self.strategy_id,
            close = bar.close,
            pos = self.pos_volume,
            "bar"
        );
        Ok(self.decide())
    }

    async fn on_order(&mut self, _order: &OrderData) -> TraderResult<()> {
        Ok(())
    }

    async fn on_trade(&mut self, _trade: &TradeData) -> TraderResult<()> {
        Ok(())
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn update_params(&mut self, updates: &FxHashMap<String, Value>) -> TraderResult<()> {
        self.params.apply(updates)
    }

    fn on_cmd_result(&mut self, view: &OrderCmdView) {
        if view.offset.is_close() {
            self.pos_volume -= view.filled_volume;
        } else {
            self.pos_volume += view.filled_volume;
        }
        // A completed exit retires the signal so it is not traded twice.
        if view.offset.is_close() && self.pos_volume <= 0 {
            self.signal = None;
        }
    }

    fn signal(&self) -> Option<Signal> {
        self.signal.clone()
    }

    fn update_signal(&mut self, signal: Signal) -> TraderResult<()> {
        info!(
            strategy_id = %self.strategy_id,
            side = signal.side,
            exit = signal.exit_time.is_some(),
            "signal updated"
        );
        self.signal = Some(signal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qtrader_common::types::{CmdStatus, Interval};

    fn bar() -> BarData {
        BarData {
            symbol: "rb2505".to_string(),
            interval: Interval::M1,
            timestamp: Utc::now(),
            open: 3500.0,
            high: 3510.0,
            low: 3490.0,
            close: 3505.0,
            volume: 100,
            turnover: 350_000.0,
            open_interest: 0.0,
            update_time: Utc::now(),
        }
    }

    fn strategy() -> SignalFollowStrategy {
        let mut config = StrategyConfig {
            kind: "signal_follow".to_string(),
            symbol: "rb2505".to_string(),
            bar: "M1".to_string(),
            enabled: true,
            params: FxHashMap::default(),
        };
        config
            .params
            .insert("volume".to_string(), serde_json::json!(3));
        let boxed = SignalFollowStrategy::create("s1", &config).unwrap();
        // Recover the concrete type for direct testing.
        let mut strategy = SignalFollowStrategy {
            strategy_id: "s1".to_string(),
            params: boxed.params().clone(),
            signal: None,
            pos_volume: 0,
        };
        strategy.init(Utc::now().date_naive()).unwrap();
        strategy
    }

    fn cmd_view(offset: Offset, filled: i64) -> OrderCmdView {
        OrderCmdView {
            cmd_id: "c1".to_string(),
            source_tag: "strategy:s1".to_string(),
            symbol: "rb2505".to_string(),
            direction: Direction::Buy,
            offset,
            target_volume: filled,
            limit_price: None,
            split_strategy: SplitStrategy::Simple,
            status: CmdStatus::Finished,
            finish_reason: Some("all_completed".to_string()),
            filled_volume: filled,
            filled_price: 3505.0,
            pending_retry_volume: 0,
            all_child_order_ids: vec![],
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_long_signal_opens_toward_target() {
        let mut strategy = strategy();
        assert!(strategy.on_bar(&bar()).await.unwrap().is_none());

        strategy
            .update_signal(Signal {
                side: 1,
                ..Default::default()
            })
            .unwrap();
        let spec = strategy.on_bar(&bar()).await.unwrap().unwrap();
        assert_eq!(spec.direction, Direction::Buy);
        assert_eq!(spec.offset, Offset::Open);
        assert_eq!(spec.volume, 3);

        // Once the target is held, no further entries.
        strategy.on_cmd_result(&cmd_view(Offset::Open, 3));
        assert!(strategy.on_bar(&bar()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exit_signal_flattens() {
        let mut strategy = strategy();
        strategy
            .update_signal(Signal {
                side: 1,
                ..Default::default()
            })
            .unwrap();
        strategy.on_cmd_result(&cmd_view(Offset::Open, 3));

        strategy
            .update_signal(Signal {
                side: 1,
                exit_time: Some(Utc::now()),
                exit_reason: "take_profit".to_string(),
                ..Default::default()
            })
            .unwrap();
        let spec = strategy.on_bar(&bar()).await.unwrap().unwrap();
        assert_eq!(spec.direction, Direction::Sell);
        assert_eq!(spec.offset, Offset::Close);
        assert_eq!(spec.volume, 3);

        // Flat again: the exit retires the signal.
        strategy.on_cmd_result(&cmd_view(Offset::Close, 3));
        assert!(strategy.signal().is_none());
        assert!(strategy.on_bar(&bar()).await.unwrap().is_none());
    }
}
