use crate::feed::types::{Candle, PriceTick};
use std::collections::{HashMap, VecDeque};

/// Decides whether a raw price is plausible against the last accepted one and
/// dampens accepted updates so the displayed value moves only partway toward
/// each new observation.
#[derive(Debug, Clone, Copy)]
pub struct PriceStabilizer {
    pub max_change_fraction: f64,
    pub smoothing_factor: f64,
}

impl Default for PriceStabilizer {
    fn default() -> Self {
        Self {
            max_change_fraction: super::types::DEFAULT_MAX_CHANGE_FRACTION,
            smoothing_factor: super::types::DEFAULT_SMOOTHING_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceDecision {
    Accepted(f64),
    Rejected,
}

impl PriceStabilizer {
    /// Pure given the two inputs and the two constants. The first tick for a
    /// subscription (no previous price) passes through unsmoothed, as does
    /// any update against a zero previous price, where a relative change is
    /// meaningless.
    pub fn stabilize(&self, new_price: f64, previous: Option<f64>) -> PriceDecision {
        let Some(previous) = previous else {
            return PriceDecision::Accepted(new_price);
        };
        if previous == 0.0 {
            return PriceDecision::Accepted(new_price);
        }

        let change = ((new_price - previous) / previous).abs();
        if change > self.max_change_fraction {
            return PriceDecision::Rejected;
        }

        PriceDecision::Accepted(previous + (new_price - previous) * self.smoothing_factor)
    }
}

/// Folds accepted `(price, timestamp)` observations into a bounded, ordered
/// OHLC bar series.
///
/// Buckets are anchored to the first tick of each bar, not to wall-clock
/// boundaries: a tick joins the last bar while `timestamp - period_start <
/// interval`, otherwise it opens a new bar at its own timestamp.
#[derive(Debug)]
pub struct CandleAggregator {
    interval_secs: i64,
    max_bars: usize,
    bars: VecDeque<Candle>,
}

impl CandleAggregator {
    pub fn new(interval_secs: i64, max_bars: usize) -> Self {
        Self {
            interval_secs,
            max_bars,
            bars: VecDeque::with_capacity(max_bars),
        }
    }

    /// Returns false when the tick's timestamp precedes the last bar's start;
    /// such regressions would corrupt high/low/close semantics and are
    /// discarded.
    pub fn ingest(&mut self, price: f64, timestamp_secs: i64) -> bool {
        match self.bars.back_mut() {
            Some(last) if timestamp_secs < last.period_start => return false,
            Some(last) if timestamp_secs - last.period_start < self.interval_secs => {
                last.apply(price);
            }
            _ => {
                self.bars.push_back(Candle::from_tick(price, timestamp_secs));
                while self.bars.len() > self.max_bars {
                    self.bars.pop_front();
                }
            }
        }
        true
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.bars.iter().copied().collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Applied { stable_price: f64 },
    RejectedOutlier { previous: f64 },
    StaleTimestamp,
}

/// Per-subscription composition of stabilizer and aggregator. Created fresh
/// whenever a subscription opens and discarded when the target changes, so
/// bars from one token can never leak into another's series.
#[derive(Debug)]
pub struct PricePipeline {
    stabilizer: PriceStabilizer,
    aggregator: CandleAggregator,
    previous_price: Option<f64>,
}

impl PricePipeline {
    pub fn new(stabilizer: PriceStabilizer, interval_secs: i64, max_bars: usize) -> Self {
        Self {
            stabilizer,
            aggregator: CandleAggregator::new(interval_secs, max_bars),
            previous_price: None,
        }
    }

    pub fn apply_tick(&mut self, tick: &PriceTick) -> TickOutcome {
        match self.stabilizer.stabilize(tick.price_sol, self.previous_price) {
            PriceDecision::Rejected => TickOutcome::RejectedOutlier {
                previous: self.previous_price.unwrap_or_default(),
            },
            PriceDecision::Accepted(stable_price) => {
                if !self.aggregator.ingest(stable_price, tick.timestamp) {
                    return TickOutcome::StaleTimestamp;
                }
                self.previous_price = Some(stable_price);
                TickOutcome::Applied { stable_price }
            }
        }
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.aggregator.candles()
    }
}

/// Caller-held previous-price map keyed by mint, used to stabilize the
/// managed wallet's token prices for display. Rejected updates keep showing
/// the last accepted value.
#[derive(Debug, Default)]
pub struct StablePriceBook {
    stabilizer: PriceStabilizer,
    previous: HashMap<String, f64>,
}

impl StablePriceBook {
    pub fn new(stabilizer: PriceStabilizer) -> Self {
        Self {
            stabilizer,
            previous: HashMap::new(),
        }
    }

    pub fn stable_price(&mut self, mint: &str, raw_price: f64) -> f64 {
        let previous = self.previous.get(mint).copied();
        match self.stabilizer.stabilize(raw_price, previous) {
            PriceDecision::Rejected => {
                tracing::warn!(mint, raw_price, "rejected implausible price change");
                previous.unwrap_or(raw_price)
            }
            PriceDecision::Accepted(smoothed) => {
                self.previous.insert(mint.to_string(), smoothed);
                smoothed
            }
        }
    }

    /// Drops previous-price entries for mints no longer held, so the book
    /// stays bounded by the wallet's token count.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.previous.retain(|mint, _| keep(mint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, timestamp: i64) -> PriceTick {
        PriceTick {
            price_sol: price,
            price_usd: None,
            market_cap: 0.0,
            timestamp,
            liquidity: None,
            liquidity_usd: None,
        }
    }

    #[test]
    fn accepts_first_price_unsmoothed() {
        let stabilizer = PriceStabilizer::default();
        assert_eq!(stabilizer.stabilize(42.0, None), PriceDecision::Accepted(42.0));
    }

    #[test]
    fn rejects_six_percent_jump_at_five_percent_threshold() {
        let stabilizer = PriceStabilizer::default();
        assert_eq!(stabilizer.stabilize(106.0, Some(100.0)), PriceDecision::Rejected);
    }

    #[test]
    fn smooths_accepted_update_partway() {
        let stabilizer = PriceStabilizer::default();
        match stabilizer.stabilize(102.0, Some(100.0)) {
            PriceDecision::Accepted(price) => assert!((price - 100.4).abs() < 1e-12),
            PriceDecision::Rejected => panic!("2% move must be accepted"),
        }
    }

    #[test]
    fn smoothed_output_stays_between_previous_and_new() {
        let stabilizer = PriceStabilizer::default();
        for (previous, new_price) in [(100.0, 104.0), (100.0, 96.0), (0.5, 0.51)] {
            match stabilizer.stabilize(new_price, Some(previous)) {
                PriceDecision::Accepted(out) => {
                    let low = previous.min(new_price);
                    let high = previous.max(new_price);
                    assert!(out >= low && out <= high, "{out} outside [{low}, {high}]");
                }
                PriceDecision::Rejected => panic!("moves within threshold must be accepted"),
            }
        }
    }

    #[test]
    fn zero_previous_price_is_accepted_without_division() {
        let stabilizer = PriceStabilizer::default();
        assert_eq!(stabilizer.stabilize(3.0, Some(0.0)), PriceDecision::Accepted(3.0));
    }

    #[test]
    fn single_interval_bar_keeps_ohlc_invariants() {
        let mut aggregator = CandleAggregator::new(60, 100);
        for (price, at) in [(10.0, 0), (12.0, 10), (8.0, 20), (11.0, 59)] {
            assert!(aggregator.ingest(price, at));
        }

        assert_eq!(aggregator.len(), 1);
        let bar = aggregator.last().expect("one bar");
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.high, 12.0);
        assert_eq!(bar.low, 8.0);
        assert_eq!(bar.close, 11.0);
        assert!(bar.low <= bar.open.min(bar.close));
        assert!(bar.high >= bar.open.max(bar.close));
    }

    #[test]
    fn splits_bars_on_tick_anchored_boundaries() {
        // t=0 p10, t=30 p11, t=70 p9 with a 60s interval: the second bar is
        // anchored at t=70, not at the wall-clock minute.
        let mut aggregator = CandleAggregator::new(60, 100);
        aggregator.ingest(10.0, 0);
        aggregator.ingest(11.0, 30);
        aggregator.ingest(9.0, 70);

        let bars = aggregator.candles();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].period_start, 0);
        assert_eq!(bars[0].open, 10.0);
        assert_eq!(bars[0].high, 11.0);
        assert_eq!(bars[0].low, 10.0);
        assert_eq!(bars[0].close, 11.0);
        assert_eq!(bars[1].period_start, 70);
        assert_eq!(bars[1].open, 9.0);
        assert_eq!(bars[1].high, 9.0);
        assert_eq!(bars[1].low, 9.0);
        assert_eq!(bars[1].close, 9.0);
    }

    #[test]
    fn evicts_oldest_bars_beyond_cap() {
        let mut aggregator = CandleAggregator::new(60, 3);
        for step in 0..10_i64 {
            aggregator.ingest(step as f64 + 1.0, step * 60);
        }

        let bars = aggregator.candles();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].period_start, 7 * 60);
        assert_eq!(bars[2].period_start, 9 * 60);
        assert!(bars.windows(2).all(|pair| pair[0].period_start <= pair[1].period_start));
    }

    #[test]
    fn discards_timestamp_regression() {
        let mut aggregator = CandleAggregator::new(60, 100);
        assert!(aggregator.ingest(10.0, 100));
        assert!(!aggregator.ingest(50.0, 99));

        let bar = aggregator.last().expect("one bar");
        assert_eq!(bar.high, 10.0);
        assert_eq!(bar.close, 10.0);
    }

    #[test]
    fn pipeline_keeps_previous_price_on_rejection() {
        let mut pipeline = PricePipeline::new(PriceStabilizer::default(), 60, 100);

        assert_eq!(
            pipeline.apply_tick(&tick(100.0, 0)),
            TickOutcome::Applied { stable_price: 100.0 }
        );
        assert_eq!(
            pipeline.apply_tick(&tick(106.0, 10)),
            TickOutcome::RejectedOutlier { previous: 100.0 }
        );

        // Series untouched by the rejected tick.
        let bars = pipeline.candles();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 100.0);
    }

    #[test]
    fn pipeline_reports_stale_ticks() {
        let mut pipeline = PricePipeline::new(PriceStabilizer::default(), 60, 100);
        pipeline.apply_tick(&tick(100.0, 1_000));
        assert_eq!(pipeline.apply_tick(&tick(100.0, 999)), TickOutcome::StaleTimestamp);
    }

    #[test]
    fn price_book_tracks_per_mint_state() {
        let mut book = StablePriceBook::default();

        assert_eq!(book.stable_price("mint-a", 100.0), 100.0);
        assert_eq!(book.stable_price("mint-b", 50.0), 50.0);

        // 6% jump on mint-a rejected; mint-b unaffected.
        assert_eq!(book.stable_price("mint-a", 106.0), 100.0);
        let smoothed = book.stable_price("mint-b", 51.0);
        assert!((smoothed - 50.2).abs() < 1e-12);
    }
}
