// src/types.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;

// --- Timeframes ---

/// Bar period. Variants are declared shortest first so `Ord` follows duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Returns the duration of this timeframe in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Returns a short label for this timeframe.
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Timeframe::all()
            .iter()
            .copied()
            .find(|tf| tf.label() == wanted)
            .ok_or_else(|| CoreError::Parse(format!("unknown timeframe '{}'", s)))
    }
}

// --- Direction / trend ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Multiplies a price difference into P&L terms.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendState {
    Bullish,
    Bearish,
    Ranging,
}

impl TrendState {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            TrendState::Bullish => Some(Direction::Long),
            TrendState::Bearish => Some(Direction::Short),
            TrendState::Ranging => None,
        }
    }
}

// --- Symbols ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolClass {
    Major,
    Jpy,
    Metal,
    Index,
}

impl SymbolClass {
    pub fn from_symbol(symbol: &str) -> Self {
        let upper = symbol.to_uppercase();
        if upper.contains("XAU") || upper.contains("XAG") {
            SymbolClass::Metal
        } else if upper.contains("NAS100") || upper.contains("US500") || upper.contains("US30") {
            SymbolClass::Index
        } else if upper.contains("JPY") {
            SymbolClass::Jpy
        } else {
            SymbolClass::Major
        }
    }
}

// --- Candles ---

/// One closed bar. `timestamp` is the bar's open time in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timeframe: Timeframe,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        timeframe: Timeframe,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            timeframe,
        }
    }

    pub fn close_time(&self) -> DateTime<Utc> {
        self.timestamp + self.timeframe.duration()
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// OHLC sanity: finite values, high/low envelope open and close.
    pub fn is_well_formed(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close];
        values.iter().all(|v| v.is_finite())
            && self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }
}
