// src/zones/patterns/fair_value_gap.rs
use crate::errors::CoreError;
use crate::types::{Candle, Direction};
use crate::zones::patterns::{PatternRecognizer, ZoneCandidate};
use crate::zones::ZoneKind;

/// Three-candle imbalance: the wicks of the first and third candle leave a gap
/// the middle candle did not trade back into.
#[derive(Debug, Default, Clone)]
pub struct FairValueGapRecognizer;

impl PatternRecognizer for FairValueGapRecognizer {
    fn kind(&self) -> ZoneKind {
        ZoneKind::Fvg
    }

    fn detect(&self, candles: &[Candle]) -> Result<Vec<ZoneCandidate>, CoreError> {
        if candles.len() < 3 {
            return Err(CoreError::InsufficientHistory {
                needed: 3,
                available: candles.len(),
            });
        }

        let mut gaps = Vec::new();
        for window in candles.windows(3) {
            let (first, third) = (&window[0], &window[2]);
            let gap = if first.high < third.low {
                Some((Direction::Long, first.high, third.low))
            } else if first.low > third.high {
                Some((Direction::Short, third.high, first.low))
            } else {
                None
            };
            if let Some((bias, low, high)) = gap {
                gaps.push(ZoneCandidate {
                    kind: ZoneKind::Fvg,
                    bias,
                    low,
                    high,
                    created_at: third.timestamp,
                    anchor: None,
                });
            }
        }
        Ok(gaps)
    }
}
