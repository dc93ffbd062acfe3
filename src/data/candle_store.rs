// src/data/candle_store.rs
use log::trace;
use std::collections::BTreeMap;

use crate::errors::CoreError;
use crate::types::{Candle, Timeframe};

/// Ordered, append-only bar buffers keyed by (symbol, timeframe).
#[derive(Debug, Default, Clone)]
pub struct CandleStore {
    series: BTreeMap<(String, Timeframe), Vec<Candle>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a closed candle and returns the full series including it.
    /// Timestamps must strictly increase within a series.
    pub fn append(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        candle: Candle,
    ) -> Result<&[Candle], CoreError> {
        if candle.timeframe != timeframe {
            return Err(CoreError::TimeframeMismatch {
                expected: timeframe,
                received: candle.timeframe,
            });
        }
        if !candle.is_well_formed() {
            return Err(CoreError::InvalidCandle(format!(
                "{}/{} {}",
                symbol, timeframe, candle.timestamp
            )));
        }

        let series = self
            .series
            .entry((symbol.to_string(), timeframe))
            .or_default();
        if let Some(last) = series.last() {
            if candle.timestamp <= last.timestamp {
                return Err(CoreError::LookaheadViolation {
                    symbol: symbol.to_string(),
                    timeframe,
                    last: last.timestamp,
                    received: candle.timestamp,
                });
            }
        }

        trace!(
            "[CandleStore] {}/{} append {} close={}",
            symbol,
            timeframe,
            candle.timestamp,
            candle.close
        );
        series.push(candle);
        Ok(series.as_slice())
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> &[Candle] {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn last(&self, symbol: &str, timeframe: Timeframe) -> Option<&Candle> {
        self.series(symbol, timeframe).last()
    }

    pub fn len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series(symbol, timeframe).len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|s| s.is_empty())
    }
}
