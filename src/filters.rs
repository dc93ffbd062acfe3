// src/filters.rs
// Bonus confirmations that live outside the zone registry: prior-day levels,
// the range-session (Asia) sweep and engulfing candles.
use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::SessionWindow;
use crate::types::{Candle, Direction};

/// Minimum body ratio of the engulfing candle over the engulfed one.
const ENGULFING_BODY_RATIO: f64 = 1.2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionLevels {
    pub previous_day_high: Option<f64>,
    pub previous_day_low: Option<f64>,
    pub range_high: Option<f64>,
    pub range_low: Option<f64>,
}

impl SessionLevels {
    /// Long setups want price holding above the prior day low, shorts below
    /// the prior day high.
    pub fn respected(&self, direction: Direction, close: f64) -> bool {
        match direction {
            Direction::Long => self.previous_day_low.map_or(false, |pdl| close > pdl),
            Direction::Short => self.previous_day_high.map_or(false, |pdh| close < pdh),
        }
    }
}

/// Day and range-session extremes maintained incrementally from the execution
/// series. "Previous day" is the last UTC date that had candles.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    range_session: SessionWindow,
    current_day: Option<NaiveDate>,
    day_high: f64,
    day_low: f64,
    levels: SessionLevels,
}

impl SessionTracker {
    pub fn new(range_session: SessionWindow) -> Self {
        Self {
            range_session,
            current_day: None,
            day_high: f64::MIN,
            day_low: f64::MAX,
            levels: SessionLevels::default(),
        }
    }

    pub fn on_candle(&mut self, candle: &Candle) {
        let day = candle.timestamp.date_naive();
        if self.current_day != Some(day) {
            if self.current_day.is_some() {
                self.levels.previous_day_high = Some(self.day_high);
                self.levels.previous_day_low = Some(self.day_low);
            }
            self.current_day = Some(day);
            self.day_high = f64::MIN;
            self.day_low = f64::MAX;
            self.levels.range_high = None;
            self.levels.range_low = None;
        }

        self.day_high = self.day_high.max(candle.high);
        self.day_low = self.day_low.min(candle.low);

        if self.range_session.contains(candle.timestamp) {
            self.levels.range_high = Some(self.levels.range_high.map_or(candle.high, |h| h.max(candle.high)));
            self.levels.range_low = Some(self.levels.range_low.map_or(candle.low, |l| l.min(candle.low)));
        }
    }

    pub fn levels(&self) -> SessionLevels {
        self.levels
    }

    /// Direction favoured by a sweep of today's completed range session within
    /// `recent`: a wick below the range low with the last close back above it
    /// is long, the mirror is short. The most recent sweeping candle decides.
    pub fn range_sweep(&self, recent: &[Candle]) -> Option<Direction> {
        let last = recent.last()?;
        if self.range_session.contains(last.timestamp) {
            return None;
        }
        let (high, low) = (self.levels.range_high?, self.levels.range_low?);

        recent.iter().rev().find_map(|c| {
            if c.low < low && last.close > low {
                Some(Direction::Long)
            } else if c.high > high && last.close < high {
                Some(Direction::Short)
            } else {
                None
            }
        })
    }
}

/// Engulfing pattern formed by `current` over `previous`, if any.
pub fn engulfing(previous: &Candle, current: &Candle) -> Option<Direction> {
    if current.body() <= previous.body() * ENGULFING_BODY_RATIO {
        return None;
    }
    if previous.is_bearish()
        && current.is_bullish()
        && current.close > previous.open
        && current.open < previous.close
    {
        Some(Direction::Long)
    } else if previous.is_bullish()
        && current.is_bearish()
        && current.close < previous.open
        && current.open > previous.close
    {
        Some(Direction::Short)
    } else {
        None
    }
}
