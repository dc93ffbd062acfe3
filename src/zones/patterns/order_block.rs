// src/zones/patterns/order_block.rs
use crate::errors::CoreError;
use crate::types::{Candle, Direction};
use crate::zones::patterns::{PatternRecognizer, ZoneCandidate};
use crate::zones::ZoneKind;

fn true_range(candle: &Candle, previous_close: f64) -> f64 {
    candle
        .range()
        .max((candle.high - previous_close).abs())
        .max((candle.low - previous_close).abs())
}

/// Mean true range of the last `period` candles of the slice. Needs one extra
/// candle in front for the first previous close.
pub fn average_true_range(candles: &[Candle], period: usize) -> Result<f64, CoreError> {
    if period == 0 || candles.len() < period + 1 {
        return Err(CoreError::InsufficientHistory {
            needed: period + 1,
            available: candles.len(),
        });
    }
    let start = candles.len() - period;
    let total: f64 = (start..candles.len())
        .map(|i| true_range(&candles[i], candles[i - 1].close))
        .sum();
    Ok(total / period as f64)
}

/// Last opposite-direction candle before a displacement bar. A displacement
/// bar's range exceeds `atr_multiplier` times the ATR of the bars before it.
#[derive(Debug, Clone)]
pub struct OrderBlockRecognizer {
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub search_bars: usize,
}

impl Default for OrderBlockRecognizer {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_multiplier: 1.5,
            search_bars: 5,
        }
    }
}

impl OrderBlockRecognizer {
    fn is_displacement(&self, candles: &[Candle], j: usize) -> Result<Option<Direction>, CoreError> {
        let bar = &candles[j];
        let direction = if bar.is_bullish() {
            Direction::Long
        } else if bar.is_bearish() {
            Direction::Short
        } else {
            return Ok(None);
        };
        let atr = average_true_range(&candles[..j], self.atr_period)?;
        Ok((bar.range() > self.atr_multiplier * atr).then_some(direction))
    }
}

impl PatternRecognizer for OrderBlockRecognizer {
    fn kind(&self) -> ZoneKind {
        ZoneKind::OrderBlock
    }

    fn detect(&self, candles: &[Candle]) -> Result<Vec<ZoneCandidate>, CoreError> {
        let first = self.atr_period + 1;
        if candles.len() <= first {
            return Err(CoreError::InsufficientHistory {
                needed: first + 1,
                available: candles.len(),
            });
        }

        let mut blocks = Vec::new();
        for j in first..candles.len() {
            let Some(direction) = self.is_displacement(candles, j)? else {
                continue;
            };
            let origin = (1..=self.search_bars.min(j))
                .map(|back| &candles[j - back])
                .find(|c| match direction {
                    Direction::Long => c.is_bearish(),
                    Direction::Short => c.is_bullish(),
                });
            if let Some(block) = origin {
                blocks.push(ZoneCandidate {
                    kind: ZoneKind::OrderBlock,
                    bias: direction,
                    low: block.low,
                    high: block.high,
                    created_at: candles[j].timestamp,
                    anchor: None,
                });
            }
        }
        Ok(blocks)
    }
}
