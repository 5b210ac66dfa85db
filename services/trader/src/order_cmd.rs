//! Compound order commands: one parent intent split into supervised child
//! orders.
//!
//! `OrderCmd` is a pure state machine. It never performs I/O: `tick` returns
//! the action the executor should perform (submit or cancel) and `update`
//! consumes order/trade events routed back by the executor. Terminal state is
//! absorbing.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use qtrader_common::types::{
    CmdStatus, Direction, Offset, OrderCmdView, OrderData, OrderRequest, SplitStrategy, TradeData,
};

/// Terminal reason for a command that filled its whole target
pub const REASON_ALL_COMPLETED: &str = "all_completed";
/// Terminal reason for a command that ran out of time
pub const REASON_TOTAL_TIMEOUT: &str = "total_timeout";
/// Terminal reason for an explicitly closed command
pub const REASON_CANCELLED: &str = "cancelled";
/// Prefix of the terminal reason for a rejected child order
pub const REASON_REJECTED_PREFIX: &str = "rejected:";

/// Parameters of a compound order command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCmdSpec {
    /// Instrument code
    pub symbol: String,
    /// Buy or sell
    pub direction: Direction,
    /// Open/close flag
    pub offset: Offset,
    /// Target volume
    pub volume: i64,
    /// Limit price; `None` means market
    #[serde(default)]
    pub price: Option<f64>,
    /// Splitting policy
    #[serde(default = "default_split")]
    pub split_strategy: SplitStrategy,
    /// Per-child volume cap
    #[serde(default = "default_max_volume")]
    pub max_volume_per_order: i64,
    /// Minimum spacing between submissions, seconds
    #[serde(default = "default_order_interval")]
    pub order_interval_seconds: f64,
    /// TWAP execution window, seconds (TWAP only)
    #[serde(default)]
    pub twap_duration_seconds: Option<u64>,
    /// Whole-command deadline, seconds
    #[serde(default = "default_total_timeout")]
    pub total_timeout_seconds: u64,
    /// Cancel/resubmit attempts per child
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-child fill deadline, seconds
    #[serde(default = "default_order_timeout")]
    pub order_timeout_seconds: f64,
}

fn default_split() -> SplitStrategy {
    SplitStrategy::Simple
}
fn default_max_volume() -> i64 {
    10
}
fn default_order_interval() -> f64 {
    0.5
}
fn default_total_timeout() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}
fn default_order_timeout() -> f64 {
    15.0
}

/// One slice of the parent volume with its earliest submission time offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitChunk {
    /// Slice volume
    pub volume: i64,
    /// Offset from the command start at which the slice becomes ready
    pub delay: Duration,
}

/// Split `total` into fixed-size chunks of at most `max_per_order`,
/// all immediately ready; spacing comes from the order interval.
#[must_use]
pub fn simple_split(total: i64, max_per_order: i64) -> Vec<SplitChunk> {
    let max_per_order = max_per_order.max(1);
    let mut chunks = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let volume = remaining.min(max_per_order);
        chunks.push(SplitChunk {
            volume,
            delay: Duration::zero(),
        });
        remaining -= volume;
    }
    chunks
}

/// Spread `total` across `N = max(1, min(ceil(total/max), duration))` slices
/// with equal time spacing; remainder volume goes one lot per earlier slice
/// so the sum is exact.
#[must_use]
pub fn twap_split(total: i64, max_per_order: i64, duration_seconds: u64) -> Vec<SplitChunk> {
    let max_per_order = max_per_order.max(1);
    let by_volume = (total + max_per_order - 1) / max_per_order;
    let slices = by_volume.min(duration_seconds as i64).max(1);
    let base = total / slices;
    let remainder = total % slices;
    let slice_millis = (duration_seconds * 1000) as i64 / slices;
    (0..slices)
        .map(|i| SplitChunk {
            volume: base + i64::from(i < remainder),
            delay: Duration::milliseconds(i * slice_millis),
        })
        .collect()
}

/// Action the executor must perform after a `tick`
#[derive(Debug, Clone, PartialEq)]
pub enum CmdAction {
    /// Submit a new child order
    Submit(OrderRequest),
    /// Cancel a child order that exceeded its fill deadline
    Cancel(String),
}

/// The one in-flight child order
#[derive(Debug, Clone)]
struct PendingOrder {
    order_id: String,
    submitted_at: DateTime<Utc>,
    retry_count: u32,
    cancel_requested: bool,
}

/// Compound order command state machine
pub struct OrderCmd {
    /// Command id
    pub cmd_id: String,
    /// Originator tag, e.g. `strategy:<id>` or `api`
    pub source_tag: String,
    spec: OrderCmdSpec,

    status: CmdStatus,
    finish_reason: Option<String>,
    filled_volume: i64,
    filled_amount: f64,
    pending_retry_volume: i64,

    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,

    all_child_order_ids: Vec<String>,
    pending_order: Option<PendingOrder>,
    chunks: VecDeque<SplitChunk>,
    last_submit_at: Option<DateTime<Utc>>,

    // Fill accounting: volume already counted per child, cumulative fill
    // volume seen on the trade stream per child, and fill ids seen.
    counted: FxHashMap<String, i64>,
    trade_cum: FxHashMap<String, i64>,
    seen_trades: FxHashSet<String>,
}

impl OrderCmd {
    /// Create a command in the `Pending` state
    #[must_use]
    pub fn new(spec: OrderCmdSpec, source_tag: impl Into<String>) -> Self {
        Self {
            cmd_id: Uuid::new_v4().simple().to_string(),
            source_tag: source_tag.into(),
            spec,
            status: CmdStatus::Pending,
            finish_reason: None,
            filled_volume: 0,
            filled_amount: 0.0,
            pending_retry_volume: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            all_child_order_ids: Vec::new(),
            pending_order: None,
            chunks: VecDeque::new(),
            last_submit_at: None,
            counted: FxHashMap::default(),
            trade_cum: FxHashMap::default(),
            seen_trades: FxHashSet::default(),
        }
    }

    /// The command parameters
    #[must_use]
    pub fn spec(&self) -> &OrderCmdSpec {
        &self.spec
    }

    /// Lifecycle state
    #[must_use]
    pub const fn status(&self) -> CmdStatus {
        self.status
    }

    /// Whether the command is being driven
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == CmdStatus::Running
    }

    /// Whether the command reached its terminal state
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == CmdStatus::Finished
    }

    /// Terminal reason, once finished
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Filled volume across all children
    #[must_use]
    pub const fn filled_volume(&self) -> i64 {
        self.filled_volume
    }

    /// Volume-weighted average fill price
    #[must_use]
    pub fn filled_price(&self) -> f64 {
        if self.filled_volume > 0 {
            self.filled_amount / self.filled_volume as f64
        } else {
            0.0
        }
    }

    /// Volume queued for resubmission after child timeouts
    #[must_use]
    pub const fn pending_retry_volume(&self) -> i64 {
        self.pending_retry_volume
    }

    /// Whether `order_id` is one of this command's children
    #[must_use]
    pub fn owns_order(&self, order_id: &str) -> bool {
        self.all_child_order_ids.iter().any(|id| id == order_id)
    }

    /// The in-flight child order id, if any
    #[must_use]
    pub fn active_order_id(&self) -> Option<&str> {
        self.pending_order.as_ref().map(|p| p.order_id.as_str())
    }

    /// Start the command: `Pending → Running`, split the target volume.
    /// Called exactly once, by the executor.
    pub fn register(&mut self, now: DateTime<Utc>) {
        if self.status != CmdStatus::Pending {
            debug!(cmd_id = %self.cmd_id, status = ?self.status, "register ignored");
            return;
        }
        self.status = CmdStatus::Running;
        self.started_at = Some(now);
        self.chunks = match self.spec.split_strategy {
            SplitStrategy::Simple => {
                simple_split(self.spec.volume, self.spec.max_volume_per_order).into()
            }
            SplitStrategy::Twap => twap_split(
                self.spec.volume,
                self.spec.max_volume_per_order,
                self.spec.twap_duration_seconds.unwrap_or(300),
            )
            .into(),
        };
        info!(
            cmd_id = %self.cmd_id,
            symbol = %self.spec.symbol,
            direction = %self.spec.direction,
            volume = self.spec.volume,
            slices = self.chunks.len(),
            "order command started"
        );
    }

    /// Time-driven decision step. Pure: performs no I/O. The rules apply in
    /// strict order; the first that matches wins.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<CmdAction> {
        if self.status != CmdStatus::Running {
            return None;
        }

        // 1. Whole-command deadline.
        if let Some(started_at) = self.started_at {
            if now - started_at >= self.total_timeout() {
                self.finish(REASON_TOTAL_TIMEOUT, now);
                return None;
            }
        }

        // 2. Target reached.
        if self.filled_volume >= self.spec.volume {
            self.finish(REASON_ALL_COMPLETED, now);
            return None;
        }

        // 3. In-flight child past its fill deadline.
        let order_timeout = self.order_timeout();
        if let Some(pending) = self.pending_order.as_mut() {
            if !pending.cancel_requested
                && now - pending.submitted_at >= order_timeout
                && pending.retry_count < self.spec.max_retries
            {
                pending.retry_count += 1;
                pending.cancel_requested = true;
                return Some(CmdAction::Cancel(pending.order_id.clone()));
            }
            // One child at a time: wait for it to resolve.
            return None;
        }

        // 4. Resubmit volume freed by a timed-out child.
        if self.pending_retry_volume > 0 {
            if self.interval_elapsed(now) {
                let volume = self.pending_retry_volume.min(self.spec.max_volume_per_order);
                self.pending_retry_volume -= volume;
                return Some(CmdAction::Submit(self.order_request(volume)));
            }
            return None;
        }

        // 5. Next scheduled slice.
        if let (Some(chunk), Some(started_at)) = (self.chunks.front(), self.started_at) {
            if now - started_at >= chunk.delay && self.interval_elapsed(now) {
                let volume = chunk.volume;
                self.chunks.pop_front();
                return Some(CmdAction::Submit(self.order_request(volume)));
            }
        }
        None
    }

    /// Restricted decision step used while the trader is paused: the
    /// whole-command deadline and in-flight cancel deadlines still apply,
    /// but no new volume is submitted.
    pub fn tick_paused(&mut self, now: DateTime<Utc>) -> Option<CmdAction> {
        if self.status != CmdStatus::Running {
            return None;
        }
        if let Some(started_at) = self.started_at {
            if now - started_at >= self.total_timeout() {
                self.finish(REASON_TOTAL_TIMEOUT, now);
                return None;
            }
        }
        let order_timeout = self.order_timeout();
        if let Some(pending) = self.pending_order.as_mut() {
            if !pending.cancel_requested
                && now - pending.submitted_at >= order_timeout
                && pending.retry_count < self.spec.max_retries
            {
                pending.retry_count += 1;
                pending.cancel_requested = true;
                return Some(CmdAction::Cancel(pending.order_id.clone()));
            }
        }
        None
    }

    /// Record a successful child submission performed by the executor
    pub fn on_order_submitted(&mut self, order_id: impl Into<String>, now: DateTime<Utc>) {
        let order_id = order_id.into();
        self.all_child_order_ids.push(order_id.clone());
        self.pending_order = Some(PendingOrder {
            order_id,
            submitted_at: now,
            retry_count: 0,
            cancel_requested: false,
        });
        self.last_submit_at = Some(now);
    }

    /// Return a slice's volume to the retry pool after a failed submission,
    /// so the command keeps pursuing its full target.
    pub fn on_submit_failed(&mut self, volume: i64) {
        if self.status == CmdStatus::Running {
            self.pending_retry_volume += volume;
        }
    }

    /// Consume an order update for one of this command's children
    pub fn on_order_update(&mut self, order: &OrderData, now: DateTime<Utc>) {
        if self.status == CmdStatus::Finished || !self.owns_order(&order.order_id) {
            return;
        }

        self.count_fill(
            &order.order_id,
            order.volume_traded,
            order.traded_price,
            CountSource::CumulativeTraded,
        );

        if order.is_rejected() {
            self.pending_order = None;
            let reason = format!("{REASON_REJECTED_PREFIX}{}", order.status_msg);
            self.finish(&reason, now);
            return;
        }

        if !order.is_active() {
            let was_pending = self
                .pending_order
                .as_ref()
                .is_some_and(|p| p.order_id == order.order_id);
            if was_pending {
                self.pending_order = None;
                if order.volume_left() > 0 {
                    self.pending_retry_volume += order.volume_left();
                    info!(
                        cmd_id = %self.cmd_id,
                        order_id = %order.order_id,
                        unfilled = order.volume_left(),
                        retry_volume = self.pending_retry_volume,
                        "child order resolved with remainder, queued for retry"
                    );
                }
            }
        }

        self.check_completion(now);
    }

    /// Consume a fill for one of this command's children
    pub fn on_trade(&mut self, trade: &TradeData, now: DateTime<Utc>) {
        if self.status == CmdStatus::Finished || !self.owns_order(&trade.order_id) {
            return;
        }
        if !self.seen_trades.insert(trade.trade_id.clone()) {
            return;
        }
        let cum = self.trade_cum.entry(trade.order_id.clone()).or_insert(0);
        *cum += trade.volume;
        let cum = *cum;
        self.count_fill(&trade.order_id, cum, trade.price, CountSource::TradeStream);
        self.check_completion(now);
    }

    /// Explicitly cancel a non-terminal command
    pub fn close(&mut self, now: DateTime<Utc>) {
        if self.status == CmdStatus::Finished {
            return;
        }
        self.finish(REASON_CANCELLED, now);
    }

    /// Read-only snapshot for other components and the IPC surface
    #[must_use]
    pub fn view(&self) -> OrderCmdView {
        OrderCmdView {
            cmd_id: self.cmd_id.clone(),
            source_tag: self.source_tag.clone(),
            symbol: self.spec.symbol.clone(),
            direction: self.spec.direction,
            offset: self.spec.offset,
            target_volume: self.spec.volume,
            limit_price: self.spec.price,
            split_strategy: self.spec.split_strategy,
            status: self.status,
            finish_reason: self.finish_reason.clone(),
            filled_volume: self.filled_volume,
            filled_price: (self.filled_price() * 100.0).round() / 100.0,
            pending_retry_volume: self.pending_retry_volume,
            all_child_order_ids: self.all_child_order_ids.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    /// Count new fill volume for a child exactly once, whichever stream
    /// reported it first. `cumulative` is the total fill volume the stream
    /// claims for that child so far.
    fn count_fill(&mut self, order_id: &str, cumulative: i64, price: f64, source: CountSource) {
        let counted = self.counted.entry(order_id.to_string()).or_insert(0);
        let delta = cumulative - *counted;
        if delta <= 0 || price <= 0.0 {
            return;
        }
        *counted = cumulative;
        self.filled_volume += delta;
        self.filled_amount += price * delta as f64;
        info!(
            cmd_id = %self.cmd_id,
            order_id,
            delta,
            price,
            filled = self.filled_volume,
            vwap = self.filled_price(),
            source = ?source,
            "fill counted"
        );
    }

    fn check_completion(&mut self, now: DateTime<Utc>) {
        if self.status != CmdStatus::Running {
            return;
        }
        if self.filled_volume >= self.spec.volume {
            self.finish(REASON_ALL_COMPLETED, now);
            return;
        }
        if let Some(started_at) = self.started_at {
            if now - started_at >= self.total_timeout() {
                self.finish(REASON_TOTAL_TIMEOUT, now);
            }
        }
    }

    fn finish(&mut self, reason: &str, now: DateTime<Utc>) {
        if self.status == CmdStatus::Finished {
            return;
        }
        self.status = CmdStatus::Finished;
        self.finish_reason = Some(reason.to_string());
        self.finished_at = Some(now);
        info!(
            cmd_id = %self.cmd_id,
            reason,
            target = self.spec.volume,
            filled = self.filled_volume,
            vwap = self.filled_price(),
            "order command finished"
        );
    }

    fn interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_submit_at {
            Some(last) => now - last >= self.order_interval(),
            None => true,
        }
    }

    fn order_request(&self, volume: i64) -> OrderRequest {
        OrderRequest {
            symbol: self.spec.symbol.clone(),
            direction: self.spec.direction,
            offset: self.spec.offset,
            volume,
            price: self.spec.price,
        }
    }

    fn order_interval(&self) -> Duration {
        Duration::milliseconds((self.spec.order_interval_seconds * 1000.0) as i64)
    }

    fn order_timeout(&self) -> Duration {
        Duration::milliseconds((self.spec.order_timeout_seconds * 1000.0) as i64)
    }

    fn total_timeout(&self) -> Duration {
        Duration::seconds(self.spec.total_timeout_seconds as i64)
    }
}

#[derive(Debug)]
enum CountSource {
    CumulativeTraded,
    TradeStream,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use qtrader_common::types::{OrderStatus, PriceType};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
    }

    fn secs(s: f64) -> Duration {
        Duration::milliseconds((s * 1000.0) as i64)
    }

    fn spec(volume: i64) -> OrderCmdSpec {
        OrderCmdSpec {
            symbol: "rb2505".to_string(),
            direction: Direction::Buy,
            offset: Offset::Open,
            volume,
            price: Some(3500.0),
            split_strategy: SplitStrategy::Simple,
            max_volume_per_order: 10,
            order_interval_seconds: 0.0,
            twap_duration_seconds: None,
            total_timeout_seconds: 30,
            max_retries: 3,
            order_timeout_seconds: 15.0,
        }
    }

    fn order_update_sized(
        cmd: &OrderCmd,
        order_id: &str,
        volume_original: i64,
        traded: i64,
        price: f64,
        status: OrderStatus,
    ) -> OrderData {
        OrderData {
            order_id: order_id.to_string(),
            symbol: cmd.spec().symbol.clone(),
            exchange: "SHFE".to_string(),
            direction: cmd.spec().direction,
            offset: cmd.spec().offset,
            volume_original,
            volume_traded: traded,
            traded_price: price,
            price: cmd.spec().price,
            price_type: PriceType::Limit,
            status,
            status_msg: String::new(),
            gateway_order_id: String::new(),
            insert_time: t0(),
            update_time: t0(),
        }
    }

    fn order_update(
        cmd: &OrderCmd,
        order_id: &str,
        traded: i64,
        price: f64,
        status: OrderStatus,
    ) -> OrderData {
        order_update_sized(cmd, order_id, 10, traded, price, status)
    }

    fn trade(cmd: &OrderCmd, trade_id: &str, order_id: &str, volume: i64, price: f64) -> TradeData {
        TradeData {
            trade_id: trade_id.to_string(),
            order_id: order_id.to_string(),
            symbol: cmd.spec().symbol.clone(),
            exchange: "SHFE".to_string(),
            direction: cmd.spec().direction,
            offset: cmd.spec().offset,
            price,
            volume,
            trade_time: t0(),
            trading_day: "20250314".to_string(),
            commission: 0.0,
        }
    }

    fn expect_submit(action: Option<CmdAction>) -> OrderRequest {
        match action {
            Some(CmdAction::Submit(req)) => req,
            other => panic!("expected submit, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_split_boundaries() {
        let sizes: Vec<i64> = simple_split(30, 10).iter().map(|c| c.volume).collect();
        assert_eq!(sizes, vec![10, 10, 10]);

        let sizes: Vec<i64> = simple_split(25, 10).iter().map(|c| c.volume).collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        let sizes: Vec<i64> = simple_split(7, 10).iter().map(|c| c.volume).collect();
        assert_eq!(sizes, vec![7]);
    }

    #[test]
    fn test_twap_split_exact_sum_and_slices() {
        // N = max(1, min(ceil(9/3), 9)) = 3, slice spacing 3s
        let chunks = twap_split(9, 3, 9);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.volume).sum::<i64>(), 9);
        assert_eq!(chunks[0].delay, Duration::zero());
        assert_eq!(chunks[1].delay, Duration::seconds(3));
        assert_eq!(chunks[2].delay, Duration::seconds(6));

        // Remainder spreads one per earlier slice.
        let chunks = twap_split(10, 3, 9);
        assert_eq!(chunks.iter().map(|c| c.volume).collect::<Vec<_>>(), vec![3, 3, 2, 2]);
        assert_eq!(chunks.iter().map(|c| c.volume).sum::<i64>(), 10);

        // Duration caps the slice count.
        let chunks = twap_split(100, 10, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.iter().map(|c| c.volume).sum::<i64>(), 100);
    }

    #[test]
    fn test_simple_fill_three_children() {
        let mut cmd = OrderCmd::new(spec(30), "api");
        cmd.register(t0());
        let mut now = t0();
        let prices = [3500.0, 3501.0, 3502.0];

        for (i, price) in prices.iter().enumerate() {
            let req = expect_submit(cmd.tick(now));
            assert_eq!(req.volume, 10);
            let order_id = format!("o{i}");
            cmd.on_order_submitted(order_id.clone(), now);

            // Three updates walk volume_traded 0 → 10; matching trade events
            // replay the same fills and must not double count.
            for traded in [3, 7, 10] {
                let status = if traded == 10 { OrderStatus::Finished } else { OrderStatus::Pending };
                cmd.on_order_update(&order_update(&cmd, &order_id, traded, *price, status), now);
            }
            cmd.on_trade(&trade(&cmd, &format!("t{i}"), &order_id, 10, *price), now);
            now += secs(0.1);
        }

        assert!(cmd.is_finished());
        assert_eq!(cmd.finish_reason(), Some(REASON_ALL_COMPLETED));
        assert_eq!(cmd.filled_volume(), 30);
        assert!((cmd.filled_price() - 3501.0).abs() < 1e-6);
        assert_eq!(cmd.view().all_child_order_ids.len(), 3);
    }

    #[test]
    fn test_twap_schedule() {
        let mut twap = spec(9);
        twap.split_strategy = SplitStrategy::Twap;
        twap.max_volume_per_order = 3;
        twap.twap_duration_seconds = Some(9);
        let mut cmd = OrderCmd::new(twap, "api");
        cmd.register(t0());

        let mut submitted = Vec::new();
        for offset in [0.0, 3.0, 6.0, 9.0] {
            let now = t0() + secs(offset);
            if let Some(CmdAction::Submit(req)) = cmd.tick(now) {
                let order_id = format!("o{offset}");
                cmd.on_order_submitted(order_id.clone(), now);
                submitted.push((offset, req.volume));
                // Resolve the child immediately so the next slice is free to go.
                cmd.on_order_update(
                    &order_update_sized(&cmd, &order_id, 3, 3, 3500.0, OrderStatus::Finished),
                    now,
                );
            }
        }
        assert_eq!(submitted, vec![(0.0, 3), (3.0, 3), (6.0, 3)]);
        assert!(cmd.is_finished());
        assert_eq!(cmd.finish_reason(), Some(REASON_ALL_COMPLETED));
    }

    #[test]
    fn test_child_timeout_and_retry() {
        let mut s = spec(10);
        s.order_timeout_seconds = 2.0;
        s.max_retries = 2;
        let mut cmd = OrderCmd::new(s, "api");
        cmd.register(t0());

        let req = expect_submit(cmd.tick(t0()));
        assert_eq!(req.volume, 10);
        cmd.on_order_submitted("o0", t0());

        // Just before the deadline: nothing to do.
        assert!(cmd.tick(t0() + secs(1.99)).is_none());

        // Past the deadline: one cancel, not repeated while in flight.
        let at = t0() + secs(2.01);
        assert_eq!(cmd.tick(at), Some(CmdAction::Cancel("o0".to_string())));
        assert!(cmd.tick(at).is_none());

        // Cancel confirmation arrives with nothing filled.
        cmd.on_order_update(&order_update(&cmd, "o0", 0, 0.0, OrderStatus::Finished), at);
        assert_eq!(cmd.pending_retry_volume(), 10);

        // The remainder is resubmitted and retry volume drains.
        let req = expect_submit(cmd.tick(at + secs(0.1)));
        assert_eq!(req.volume, 10);
        cmd.on_order_submitted("o1", at + secs(0.1));
        assert_eq!(cmd.pending_retry_volume(), 0);
        assert_eq!(cmd.view().all_child_order_ids, vec!["o0", "o1"]);
        assert!(!cmd.is_finished());
    }

    #[test]
    fn test_reject_finishes_with_message() {
        let mut cmd = OrderCmd::new(spec(5), "api");
        cmd.register(t0());
        let req = expect_submit(cmd.tick(t0()));
        assert_eq!(req.volume, 5);
        cmd.on_order_submitted("o0", t0());

        let mut order = order_update(&cmd, "o0", 0, 0.0, OrderStatus::Pending);
        order.status_msg = "insufficient margin".to_string();
        cmd.on_order_update(&order, t0() + secs(0.2));

        assert!(cmd.is_finished());
        assert!(cmd
            .finish_reason()
            .unwrap()
            .starts_with(REASON_REJECTED_PREFIX));
        assert_eq!(cmd.filled_volume(), 0);
    }

    #[test]
    fn test_total_timeout_boundary() {
        let mut cmd = OrderCmd::new(spec(10), "api");
        cmd.register(t0());
        let req = expect_submit(cmd.tick(t0()));
        cmd.on_order_submitted("o0", t0());
        assert_eq!(req.volume, 10);

        // Just under the deadline the command keeps running.
        assert!(cmd.tick(t0() + secs(29.99)).is_none() || !cmd.is_finished());
        assert!(!cmd.is_finished());

        cmd.tick(t0() + secs(30.01));
        assert!(cmd.is_finished());
        assert_eq!(cmd.finish_reason(), Some(REASON_TOTAL_TIMEOUT));
    }

    #[test]
    fn test_terminal_state_is_absorbing() {
        let mut cmd = OrderCmd::new(spec(10), "api");
        cmd.register(t0());
        expect_submit(cmd.tick(t0()));
        cmd.on_order_submitted("o0", t0());
        cmd.close(t0());
        assert_eq!(cmd.finish_reason(), Some(REASON_CANCELLED));

        // Late events no longer mutate the command.
        cmd.on_order_update(&order_update(&cmd, "o0", 10, 3500.0, OrderStatus::Finished), t0());
        assert_eq!(cmd.filled_volume(), 0);
        assert!(cmd.tick(t0() + secs(1.0)).is_none());
        cmd.close(t0());
        assert_eq!(cmd.finish_reason(), Some(REASON_CANCELLED));
    }

    #[test]
    fn test_fill_counted_once_across_both_streams() {
        let mut cmd = OrderCmd::new(spec(10), "api");
        cmd.register(t0());
        expect_submit(cmd.tick(t0()));
        cmd.on_order_submitted("o0", t0());

        // The trade stream reports the fill first, then the order stream
        // replays it, then the trade is duplicated.
        let fill = trade(&cmd, "t0", "o0", 4, 3500.0);
        cmd.on_trade(&fill, t0());
        cmd.on_order_update(&order_update(&cmd, "o0", 4, 3500.0, OrderStatus::Pending), t0());
        cmd.on_trade(&fill, t0());
        assert_eq!(cmd.filled_volume(), 4);

        // Order stream runs ahead of the trade stream for the remainder.
        cmd.on_order_update(&order_update(&cmd, "o0", 10, 3500.0, OrderStatus::Finished), t0());
        cmd.on_trade(&trade(&cmd, "t1", "o0", 6, 3500.0), t0());
        assert_eq!(cmd.filled_volume(), 10);
        assert!(cmd.is_finished());
    }

    #[test]
    fn test_vwap_incremental() {
        let mut cmd = OrderCmd::new(spec(20), "api");
        cmd.register(t0());
        expect_submit(cmd.tick(t0()));
        cmd.on_order_submitted("o0", t0());
        cmd.on_order_update(&order_update(&cmd, "o0", 10, 3500.0, OrderStatus::Finished), t0());
        let req = expect_submit(cmd.tick(t0() + secs(0.1)));
        assert_eq!(req.volume, 10);
        cmd.on_order_submitted("o1", t0() + secs(0.1));
        cmd.on_order_update(&order_update(&cmd, "o1", 10, 3600.0, OrderStatus::Finished), t0());

        let total: f64 = 3500.0 * 10.0 + 3600.0 * 10.0;
        assert!((cmd.filled_price() * 20.0 - total).abs() / total < 1e-6);
    }
}
