//! Tick-to-bar resampling with day-anchored bucketing.
//!
//! Minute buckets are anchored on the trading-day anchor (09:30 by default
//! for the Chinese futures day session), hour buckets on midnight, daily
//! buckets at midnight. A tick exactly on a bucket boundary closes the
//! previous bucket and opens the new one; the boundary tick belongs to the
//! new bucket.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use rustc_hash::FxHashMap;
use tracing::debug;

use qtrader_common::constants::defaults;
use qtrader_common::types::{BarData, Interval, TickData};

/// The default trading-day anchor
#[must_use]
pub fn default_anchor() -> NaiveTime {
    let (hour, minute) = defaults::DAY_ANCHOR;
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Compute the bucket start for a timestamp at the given interval
#[must_use]
pub fn bucket_start(ts: DateTime<Utc>, interval: Interval, anchor: NaiveTime) -> DateTime<Utc> {
    let minutes = i64::from(interval.minutes());
    let midnight = ts
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or(ts.naive_utc())
        .and_utc();
    match interval {
        Interval::D1 => midnight,
        Interval::H1 => {
            let span = i64::from(interval.minutes() / 60);
            let hour = (i64::from(ts.hour()) / span) * span;
            midnight + Duration::hours(hour)
        }
        _ => {
            let day_anchor = midnight + Duration::seconds(i64::from(anchor.num_seconds_from_midnight()));
            let offset = (ts - day_anchor).num_seconds();
            let width = minutes * 60;
            day_anchor + Duration::seconds(offset.div_euclid(width) * width)
        }
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    start: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    turnover: f64,
    open_interest: f64,
    update_time: DateTime<Utc>,
}

impl BucketState {
    fn seed(start: DateTime<Utc>, tick: &TickData) -> Self {
        Self {
            start,
            open: tick.last_price,
            high: tick.last_price,
            low: tick.last_price,
            close: tick.last_price,
            volume: tick.volume,
            turnover: tick.turnover,
            open_interest: tick.open_interest,
            update_time: tick.timestamp,
        }
    }

    fn absorb(&mut self, tick: &TickData) {
        self.high = self.high.max(tick.last_price);
        self.low = self.low.min(tick.last_price);
        self.close = tick.last_price;
        self.volume += tick.volume;
        self.turnover += tick.turnover;
        self.open_interest = tick.open_interest;
        self.update_time = tick.timestamp;
    }

    fn into_bar(self, symbol: &str, interval: Interval) -> BarData {
        BarData {
            symbol: symbol.to_string(),
            interval,
            timestamp: self.start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            turnover: self.turnover,
            open_interest: self.open_interest,
            update_time: self.update_time,
        }
    }
}

/// Per-symbol resampler producing bars for every subscribed interval
pub struct BarGenerator {
    symbol: String,
    anchor: NaiveTime,
    buckets: FxHashMap<Interval, BucketState>,
    completed: FxHashMap<Interval, Vec<BarData>>,
}

impl BarGenerator {
    /// Create a generator anchored at the default day anchor
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_anchor(symbol, default_anchor())
    }

    /// Create a generator with a custom day anchor
    #[must_use]
    pub fn with_anchor(symbol: impl Into<String>, anchor: NaiveTime) -> Self {
        Self {
            symbol: symbol.into(),
            anchor,
            buckets: FxHashMap::default(),
            completed: FxHashMap::default(),
        }
    }

    /// Activate bar production for one interval. Idempotent.
    pub fn subscribe(&mut self, interval: Interval) {
        if !self.completed.contains_key(&interval) {
            debug!(symbol = %self.symbol, %interval, "bar interval subscribed");
            self.completed.insert(interval, Vec::new());
        }
    }

    /// Subscribed intervals
    #[must_use]
    pub fn intervals(&self) -> Vec<Interval> {
        self.completed.keys().copied().collect()
    }

    /// Fold one tick into every subscribed interval, returning the bars the
    /// tick completed.
    pub fn update_tick(&mut self, tick: &TickData) -> Vec<BarData> {
        let mut finished = Vec::new();
        let intervals: Vec<Interval> = self.completed.keys().copied().collect();
        for interval in intervals {
            let start = bucket_start(tick.timestamp, interval, self.anchor);
            match self.buckets.get_mut(&interval) {
                None => {
                    self.buckets.insert(interval, BucketState::seed(start, tick));
                }
                Some(bucket) if bucket.start == start => bucket.absorb(tick),
                Some(_) => {
                    // Boundary crossed: close out the stored bucket, the
                    // boundary tick seeds the new one.
                    let done = self
                        .buckets
                        .insert(interval, BucketState::seed(start, tick))
                        .map(|b| b.into_bar(&self.symbol, interval));
                    if let Some(bar) = done {
                        self.completed.entry(interval).or_default().push(bar.clone());
                        finished.push(bar);
                    }
                }
            }
        }
        finished
    }

    /// The n-th most recent completed bar (1 = latest)
    #[must_use]
    pub fn get_bar(&self, interval: Interval, n: usize) -> Option<&BarData> {
        let bars = self.completed.get(&interval)?;
        if n == 0 || bars.len() < n {
            return None;
        }
        bars.get(bars.len() - n)
    }

    /// Up to `count` most recent completed bars, in time order
    #[must_use]
    pub fn get_bars(&self, interval: Interval, count: usize) -> Vec<BarData> {
        let Some(bars) = self.completed.get(&interval) else {
            return Vec::new();
        };
        let skip = bars.len().saturating_sub(count);
        bars[skip..].to_vec()
    }
}

/// Bar generators for many symbols
#[derive(Default)]
pub struct MultiSymbolBarGenerator {
    generators: FxHashMap<String, BarGenerator>,
}

impl MultiSymbolBarGenerator {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the generator for one symbol
    pub fn get_or_create(&mut self, symbol: &str) -> &mut BarGenerator {
        self.generators
            .entry(symbol.to_string())
            .or_insert_with(|| BarGenerator::new(symbol))
    }

    /// The generator for one symbol, if it exists
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&BarGenerator> {
        self.generators.get(symbol)
    }

    /// Route a tick to its symbol's generator
    pub fn update_tick(&mut self, tick: &TickData) -> Vec<BarData> {
        match self.generators.get_mut(&tick.symbol) {
            Some(generator) => generator.update_tick(tick),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
            .and_utc()
    }

    fn tick(at: DateTime<Utc>, price: f64, volume: i64) -> TickData {
        TickData {
            symbol: "rb2505".to_string(),
            exchange: "SHFE".to_string(),
            timestamp: at,
            last_price: price,
            bid1: price - 1.0,
            ask1: price + 1.0,
            bid_vol1: 10,
            ask_vol1: 10,
            volume,
            turnover: price * volume as f64,
            open_interest: 1000.0,
            open: price,
            high: price,
            low: price,
            pre_close: price,
            limit_up: price * 1.1,
            limit_down: price * 0.9,
        }
    }

    #[test]
    fn test_minute_bucket_is_day_anchored() {
        let anchor = default_anchor();
        assert_eq!(
            bucket_start(ts(9, 47, 30, 0), Interval::M15, anchor),
            ts(9, 45, 0, 0)
        );
        // Before the anchor the grid still extends backwards.
        assert_eq!(
            bucket_start(ts(9, 14, 0, 0), Interval::M15, anchor),
            ts(9, 0, 0, 0)
        );
    }

    #[test]
    fn test_hour_and_day_buckets_align_to_midnight() {
        let anchor = default_anchor();
        assert_eq!(
            bucket_start(ts(10, 59, 59, 999), Interval::H1, anchor),
            ts(10, 0, 0, 0)
        );
        assert_eq!(
            bucket_start(ts(14, 30, 0, 0), Interval::D1, anchor),
            ts(0, 0, 0, 0)
        );
    }

    #[test]
    fn test_boundary_tick_opens_new_bucket() {
        let mut generator = BarGenerator::new("rb2505");
        generator.subscribe(Interval::M1);

        assert!(generator.update_tick(&tick(ts(9, 30, 0, 0), 3500.0, 5)).is_empty());
        assert!(generator.update_tick(&tick(ts(9, 30, 30, 0), 3510.0, 3)).is_empty());
        assert!(generator
            .update_tick(&tick(ts(9, 30, 59, 999), 3495.0, 2))
            .is_empty());

        let done = generator.update_tick(&tick(ts(9, 31, 0, 0), 3520.0, 7));
        assert_eq!(done.len(), 1);
        let bar = &done[0];
        assert_eq!(bar.timestamp, ts(9, 30, 0, 0));
        assert_eq!(bar.open, 3500.0);
        assert_eq!(bar.close, 3495.0);
        assert_eq!(bar.high, 3510.0);
        assert_eq!(bar.low, 3495.0);
        assert_eq!(bar.volume, 10);

        // The boundary tick seeded the new bucket, not the closed one.
        let next = generator.update_tick(&tick(ts(9, 32, 0, 0), 3521.0, 1));
        assert_eq!(next[0].open, 3520.0);
        assert_eq!(next[0].volume, 7);
    }

    #[test]
    fn test_multiple_intervals_progress_independently() {
        let mut generator = BarGenerator::new("rb2505");
        generator.subscribe(Interval::M1);
        generator.subscribe(Interval::M5);

        generator.update_tick(&tick(ts(9, 30, 0, 0), 3500.0, 1));
        for minute in 31..35 {
            let done = generator.update_tick(&tick(ts(9, minute, 0, 0), 3500.0, 1));
            assert_eq!(done.len(), 1, "only the M1 bucket closes at 09:{minute}");
        }
        let done = generator.update_tick(&tick(ts(9, 35, 0, 0), 3500.0, 1));
        assert_eq!(done.len(), 2, "both M1 and M5 close at 09:35");
    }

    #[test]
    fn test_history_access() {
        let mut generator = BarGenerator::new("rb2505");
        generator.subscribe(Interval::M1);
        for minute in 0..5 {
            generator.update_tick(&tick(ts(10, minute, 0, 0), 3500.0 + f64::from(minute), 1));
        }
        assert_eq!(generator.get_bars(Interval::M1, 10).len(), 4);
        let latest = generator.get_bar(Interval::M1, 1).unwrap();
        assert_eq!(latest.timestamp, ts(10, 3, 0, 0));
        assert!(generator.get_bar(Interval::M1, 9).is_none());
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut generator = BarGenerator::new("rb2505");
        generator.subscribe(Interval::M1);
        generator.update_tick(&tick(ts(10, 0, 0, 0), 1.0, 1));
        generator.update_tick(&tick(ts(10, 1, 0, 0), 1.0, 1));
        generator.subscribe(Interval::M1);
        assert_eq!(generator.get_bars(Interval::M1, 10).len(), 1);
    }
}
