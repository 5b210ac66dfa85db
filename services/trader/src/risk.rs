//! Pre-trade risk checks: daily order/cancel caps and per-order volume cap.
//!
//! Counters reset automatically at the first check or count on a new local
//! date, so a trader that runs across midnight starts the day at zero.

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use qtrader_common::config::RiskConfig;
use qtrader_common::errors::{TraderError, TraderResult};

/// Daily risk counters for one trader
pub struct RiskControl {
    config: RiskConfig,
    daily_order_count: u32,
    daily_cancel_count: u32,
    last_reset_date: Option<NaiveDate>,
}

impl RiskControl {
    /// Create with the configured limits
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            daily_order_count: 0,
            daily_cancel_count: 0,
            last_reset_date: None,
        }
    }

    /// Replace the limits at runtime
    pub fn update_config(&mut self, config: RiskConfig) {
        info!(
            max_daily_orders = config.max_daily_orders,
            max_daily_cancels = config.max_daily_cancels,
            max_order_volume = config.max_order_volume,
            "risk limits updated"
        );
        self.config = config;
    }

    /// Orders submitted today
    #[must_use]
    pub fn daily_order_count(&mut self) -> u32 {
        self.maybe_reset();
        self.daily_order_count
    }

    /// Cancels issued today
    #[must_use]
    pub fn daily_cancel_count(&mut self) -> u32 {
        self.maybe_reset();
        self.daily_cancel_count
    }

    /// Validate an order before it reaches the gateway
    pub fn check_order(&mut self, volume: i64) -> TraderResult<()> {
        self.maybe_reset();
        if volume <= 0 {
            return Err(TraderError::Risk("order volume must be positive".to_string()));
        }
        if volume > self.config.max_order_volume {
            warn!(volume, cap = self.config.max_order_volume, "order volume over cap");
            return Err(TraderError::Risk(format!(
                "order volume {volume} exceeds cap {}",
                self.config.max_order_volume
            )));
        }
        if self.daily_order_count >= self.config.max_daily_orders {
            warn!(count = self.daily_order_count, "daily order cap reached");
            return Err(TraderError::Risk(format!(
                "daily order cap {} reached",
                self.config.max_daily_orders
            )));
        }
        Ok(())
    }

    /// Validate a cancel before it reaches the gateway
    pub fn check_cancel(&mut self) -> TraderResult<()> {
        self.maybe_reset();
        if self.daily_cancel_count >= self.config.max_daily_cancels {
            warn!(count = self.daily_cancel_count, "daily cancel cap reached");
            return Err(TraderError::Risk(format!(
                "daily cancel cap {} reached",
                self.config.max_daily_cancels
            )));
        }
        Ok(())
    }

    /// Count a submitted order
    pub fn on_order_inserted(&mut self) {
        self.maybe_reset();
        self.daily_order_count += 1;
    }

    /// Count an issued cancel
    pub fn on_order_cancelled(&mut self) {
        self.maybe_reset();
        self.daily_cancel_count += 1;
    }

    /// Human-readable counter summary shown on the account snapshot
    #[must_use]
    pub fn status(&mut self) -> String {
        self.maybe_reset();
        format!(
            "orders {}/{}, cancels {}/{}",
            self.daily_order_count,
            self.config.max_daily_orders,
            self.daily_cancel_count,
            self.config.max_daily_cancels
        )
    }

    fn maybe_reset(&mut self) {
        let today = Utc::now().date_naive();
        if self.last_reset_date != Some(today) {
            if self.last_reset_date.is_some() {
                info!(%today, "risk counters reset for new date");
            }
            self.daily_order_count = 0;
            self.daily_cancel_count = 0;
            self.last_reset_date = Some(today);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> RiskControl {
        RiskControl::new(RiskConfig {
            max_daily_orders: 3,
            max_daily_cancels: 2,
            max_order_volume: 10,
        })
    }

    #[test]
    fn test_volume_cap() {
        let mut risk = control();
        assert!(risk.check_order(10).is_ok());
        assert!(risk.check_order(11).is_err());
        assert!(risk.check_order(0).is_err());
    }

    #[test]
    fn test_daily_order_cap() {
        let mut risk = control();
        for _ in 0..3 {
            assert!(risk.check_order(1).is_ok());
            risk.on_order_inserted();
        }
        let err = risk.check_order(1).unwrap_err();
        assert_eq!(err.kind(), "risk");
        assert_eq!(risk.daily_order_count(), 3);
    }

    #[test]
    fn test_cancel_cap() {
        let mut risk = control();
        risk.on_order_cancelled();
        risk.on_order_cancelled();
        assert!(risk.check_cancel().is_err());
    }

    #[test]
    fn test_counts_nondecreasing_within_day() {
        let mut risk = control();
        risk.on_order_inserted();
        let first = risk.daily_order_count();
        risk.on_order_inserted();
        assert!(risk.daily_order_count() >= first);
    }

    #[test]
    fn test_stale_date_resets() {
        let mut risk = control();
        risk.on_order_inserted();
        risk.on_order_inserted();
        // Pretend the counters were last touched yesterday.
        risk.last_reset_date = Utc::now().date_naive().pred_opt();
        assert_eq!(risk.daily_order_count(), 0);
        assert!(risk.check_order(1).is_ok());
    }

    #[test]
    fn test_status_summary() {
        let mut risk = control();
        risk.on_order_inserted();
        assert_eq!(risk.status(), "orders 1/3, cancels 0/2");
    }
}
