// src/structure/market_structure.rs
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::structure::swings::{confirmed_by, SwingKind, SwingPoint};
use crate::types::{Candle, Direction, Timeframe, TrendState};

/// Dominance ratio the warm-up classifier needs before it picks a side.
const TREND_DOMINANCE: f64 = 1.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureKind {
    #[serde(rename = "BOS")]
    Bos,
    #[serde(rename = "ChoCH")]
    Choch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakDirection {
    Up,
    Down,
}

impl BreakDirection {
    pub fn as_direction(&self) -> Direction {
        match self {
            BreakDirection::Up => Direction::Long,
            BreakDirection::Down => Direction::Short,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureEvent {
    pub kind: StructureKind,
    pub direction: BreakDirection,
    pub timeframe: Timeframe,
    /// Price of the swing point that was broken.
    pub level: f64,
    /// Open time of the candle whose close broke the level.
    pub time: DateTime<Utc>,
    pub swing_time: DateTime<Utc>,
}

/// Incremental swing/trend/break tracker for one (symbol, timeframe) series.
///
/// Trend handling:
/// - fewer than `2k + 1` candles: Ranging, no events;
/// - until two confirmed swing highs and two confirmed swing lows exist, the
///   trend is re-scored every bar from higher-high/higher-low counts;
/// - afterwards it is re-evaluated whenever a new swing confirms
///   (HH + HL bullish, LH + LL bearish, anything else ranging);
/// - a ChoCH flips it immediately.
///
/// A close beyond the latest confirmed swing in the trend direction is a BOS,
/// against it a ChoCH. While ranging there is no trend to reverse, so breaks
/// are reported as BOS. Each swing level breaks at most once.
#[derive(Debug, Clone)]
pub struct MarketStructureAnalyzer {
    timeframe: Timeframe,
    lookback: usize,
    trend_window: usize,
    trend: TrendState,
    swings: Vec<SwingPoint>,
    swing_highs: usize,
    swing_lows: usize,
    events: Vec<StructureEvent>,
    broken_high: Option<DateTime<Utc>>,
    broken_low: Option<DateTime<Utc>>,
    processed: usize,
}

impl MarketStructureAnalyzer {
    pub fn new(timeframe: Timeframe, lookback: usize, trend_window: usize) -> Self {
        Self {
            timeframe,
            lookback: lookback.max(1),
            trend_window: trend_window.max(2),
            trend: TrendState::Ranging,
            swings: Vec::new(),
            swing_highs: 0,
            swing_lows: 0,
            events: Vec::new(),
            broken_high: None,
            broken_low: None,
            processed: 0,
        }
    }

    pub fn from_config(config: &StrategyConfig, timeframe: Timeframe) -> Self {
        Self::new(timeframe, config.lookback(timeframe), config.trend_window)
    }

    /// Minimum candles before any trend or event is produced.
    pub fn min_window(&self) -> usize {
        2 * self.lookback + 1
    }

    /// Processes every candle not seen yet and returns the events they produced.
    /// `candles` must be the same append-only series on every call.
    pub fn update(&mut self, candles: &[Candle]) -> Vec<StructureEvent> {
        let mut fresh = Vec::new();
        if candles.len() < self.processed {
            // Series was replaced; start over.
            self.reset();
        }
        for n in self.processed..candles.len() {
            self.step(candles, n, &mut fresh);
        }
        self.processed = candles.len();
        fresh
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.timeframe, self.lookback, self.trend_window);
    }

    fn step(&mut self, candles: &[Candle], n: usize, out: &mut Vec<StructureEvent>) {
        let confirmed = confirmed_by(candles, n, self.lookback);
        let swing_confirmed = !confirmed.is_empty();
        for swing in confirmed {
            trace!(
                "[StructureAnalyzer] {} swing {:?} {:.5} at {} confirmed",
                self.timeframe,
                swing.kind,
                swing.price,
                swing.time
            );
            match swing.kind {
                SwingKind::High => self.swing_highs += 1,
                SwingKind::Low => self.swing_lows += 1,
            }
            self.swings.push(swing);
        }

        if n + 1 < self.min_window() {
            return;
        }

        if !self.has_swing_structure() {
            self.trend = sequence_trend(&candles[..=n], self.trend_window, self.lookback);
        } else if swing_confirmed {
            let next = self.swing_structure_trend();
            if next != self.trend {
                debug!(
                    "[StructureAnalyzer] {} trend {:?} -> {:?} on swing structure",
                    self.timeframe, self.trend, next
                );
            }
            self.trend = next;
        }

        let candle = &candles[n];
        if let Some(high) = self.latest_swing(SwingKind::High).cloned() {
            if self.broken_high != Some(high.time) && candle.close > high.price {
                self.broken_high = Some(high.time);
                self.emit(BreakDirection::Up, &high, candle, out);
            }
        }
        if let Some(low) = self.latest_swing(SwingKind::Low).cloned() {
            if self.broken_low != Some(low.time) && candle.close < low.price {
                self.broken_low = Some(low.time);
                self.emit(BreakDirection::Down, &low, candle, out);
            }
        }
    }

    fn emit(
        &mut self,
        direction: BreakDirection,
        swing: &SwingPoint,
        candle: &Candle,
        out: &mut Vec<StructureEvent>,
    ) {
        let kind = match (self.trend, direction) {
            (TrendState::Bullish, BreakDirection::Down) | (TrendState::Bearish, BreakDirection::Up) => {
                StructureKind::Choch
            }
            _ => StructureKind::Bos,
        };
        if kind == StructureKind::Choch {
            self.trend = match direction {
                BreakDirection::Up => TrendState::Bullish,
                BreakDirection::Down => TrendState::Bearish,
            };
        }

        let event = StructureEvent {
            kind,
            direction,
            timeframe: self.timeframe,
            level: swing.price,
            time: candle.timestamp,
            swing_time: swing.time,
        };
        debug!(
            "[StructureAnalyzer] {} {:?} {:?} through {:.5} (close {:.5}) at {}",
            self.timeframe, event.kind, event.direction, event.level, candle.close, candle.timestamp
        );
        self.events.push(event.clone());
        out.push(event);
    }

    fn has_swing_structure(&self) -> bool {
        self.swing_highs >= 2 && self.swing_lows >= 2
    }

    fn last_two(&self, kind: SwingKind) -> Option<(f64, f64)> {
        let mut it = self.swings.iter().rev().filter(|s| s.kind == kind);
        let latest = it.next()?;
        let previous = it.next()?;
        Some((previous.price, latest.price))
    }

    fn swing_structure_trend(&self) -> TrendState {
        match (self.last_two(SwingKind::High), self.last_two(SwingKind::Low)) {
            (Some((h1, h2)), Some((l1, l2))) => {
                if h2 > h1 && l2 > l1 {
                    TrendState::Bullish
                } else if h2 < h1 && l2 < l1 {
                    TrendState::Bearish
                } else {
                    TrendState::Ranging
                }
            }
            _ => TrendState::Ranging,
        }
    }

    pub fn trend(&self) -> TrendState {
        self.trend
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Confirmed swing points in bar order.
    pub fn swings(&self) -> &[SwingPoint] {
        &self.swings
    }

    pub fn latest_swing(&self, kind: SwingKind) -> Option<&SwingPoint> {
        self.swings.iter().rev().find(|s| s.kind == kind)
    }

    pub fn events(&self) -> &[StructureEvent] {
        &self.events
    }

    /// Events whose breaking candle opened at or after `since`, newest first.
    pub fn events_since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &StructureEvent> {
        self.events.iter().rev().take_while(move |e| e.time >= since)
    }
}

/// Warm-up classifier: counts bars making a higher high / higher low against
/// the previous `span` bars versus lower highs / lower lows, over the last
/// `window` bars.
pub fn sequence_trend(candles: &[Candle], window: usize, span: usize) -> TrendState {
    let tail = &candles[candles.len().saturating_sub(window)..];
    if span == 0 || tail.len() <= span {
        return TrendState::Ranging;
    }

    let (mut bullish, mut bearish) = (0usize, 0usize);
    for i in span..tail.len() {
        let prior = &tail[i - span..i];
        let max_high = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let min_high = prior.iter().map(|c| c.high).fold(f64::MAX, f64::min);
        let max_low = prior.iter().map(|c| c.low).fold(f64::MIN, f64::max);
        let min_low = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let c = &tail[i];

        if c.high > max_high {
            bullish += 1;
        }
        if c.low > max_low {
            bullish += 1;
        }
        if c.high < min_high {
            bearish += 1;
        }
        if c.low < min_low {
            bearish += 1;
        }
    }

    if bullish > 0 && bullish as f64 > bearish as f64 * TREND_DOMINANCE {
        TrendState::Bullish
    } else if bearish > 0 && bearish as f64 > bullish as f64 * TREND_DOMINANCE {
        TrendState::Bearish
    } else {
        TrendState::Ranging
    }
}
