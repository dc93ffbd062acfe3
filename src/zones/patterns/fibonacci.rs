// src/zones/patterns/fibonacci.rs
use crate::errors::CoreError;
use crate::structure::swings::{find_swings, SwingKind};
use crate::types::{Candle, Direction};
use crate::zones::patterns::{PatternRecognizer, ZoneCandidate};
use crate::zones::ZoneKind;

/// Retracement band on each confirmed swing leg. An up-leg (low then high)
/// gives a long band at `high - range * ratio`; a down-leg gives a short band
/// at `low + range * ratio`. The band is `level * (1 +/- tolerance)` and the
/// zone is stamped with the bar that confirmed the leg's second swing, so the
/// newest band always belongs to the latest confirmed leg.
#[derive(Debug, Clone)]
pub struct FibonacciRecognizer {
    pub lookback: usize,
    pub ratio: f64,
    pub tolerance: f64,
}

impl Default for FibonacciRecognizer {
    fn default() -> Self {
        Self {
            lookback: 3,
            ratio: 0.79,
            tolerance: 0.005,
        }
    }
}

impl PatternRecognizer for FibonacciRecognizer {
    fn kind(&self) -> ZoneKind {
        ZoneKind::FibLevel
    }

    fn detect(&self, candles: &[Candle]) -> Result<Vec<ZoneCandidate>, CoreError> {
        let needed = 2 * self.lookback + 1;
        if candles.len() < needed {
            return Err(CoreError::InsufficientHistory {
                needed,
                available: candles.len(),
            });
        }

        let swings: Vec<_> = find_swings(candles, self.lookback)
            .into_iter()
            .filter(|s| s.confirmed)
            .collect();

        let mut levels = Vec::new();
        for pair in swings.windows(2) {
            let (start, end) = (&pair[0], &pair[1]);
            if start.kind == end.kind || start.index == end.index {
                continue;
            }
            let Some(created_at) = end.confirmed_at else {
                continue;
            };
            let (low, high, bias, anchor) = match end.kind {
                SwingKind::High => (start.price, end.price, Direction::Long, start.price),
                SwingKind::Low => (end.price, start.price, Direction::Short, start.price),
            };
            if high <= low {
                continue;
            }
            let level = match bias {
                Direction::Long => high - (high - low) * self.ratio,
                Direction::Short => low + (high - low) * self.ratio,
            };
            levels.push(ZoneCandidate {
                kind: ZoneKind::FibLevel,
                bias,
                low: level * (1.0 - self.tolerance),
                high: level * (1.0 + self.tolerance),
                created_at,
                anchor: Some(anchor),
            });
        }
        Ok(levels)
    }
}
