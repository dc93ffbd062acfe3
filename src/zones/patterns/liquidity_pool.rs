// src/zones/patterns/liquidity_pool.rs
use chrono::{DateTime, Utc};

use crate::errors::CoreError;
use crate::structure::swings::{confirmed_by, SwingKind, SwingPoint};
use crate::types::{Candle, Direction};
use crate::zones::patterns::{PatternRecognizer, ZoneCandidate};
use crate::zones::ZoneKind;

/// Clusters of equal highs or equal lows. Swings are visited in the order
/// they are confirmed; a new swing within `tolerance` (relative) of one or
/// more open swings of the same kind closes a pool with them. Pooled swings
/// never pair again, and an open swing is dropped once a later bar trades
/// beyond it by more than the tolerance. Pools of highs carry a short bias
/// (a sweep above them favours selling), pools of lows a long bias.
///
/// The open swings persist between calls to [`PatternRecognizer::advance`],
/// so a window that slides past an old swing cannot re-pair what is left.
#[derive(Debug, Clone)]
pub struct LiquidityPoolRecognizer {
    pub lookback: usize,
    pub tolerance: f64,
    state: PoolState,
}

#[derive(Debug, Clone, Default)]
struct PoolState {
    open_highs: Vec<SwingPoint>,
    open_lows: Vec<SwingPoint>,
    last_seen: Option<DateTime<Utc>>,
}

impl Default for LiquidityPoolRecognizer {
    fn default() -> Self {
        Self::new(3, 0.0005)
    }
}

impl LiquidityPoolRecognizer {
    pub fn new(lookback: usize, tolerance: f64) -> Self {
        Self {
            lookback,
            tolerance,
            state: PoolState::default(),
        }
    }

    fn check_history(&self, candles: &[Candle]) -> Result<(), CoreError> {
        let needed = 2 * self.lookback + 1;
        if candles.len() < needed {
            return Err(CoreError::InsufficientHistory {
                needed,
                available: candles.len(),
            });
        }
        Ok(())
    }

    /// Processes bar `n` of `candles`: removes swings it takes out, then
    /// clusters whatever swing it confirms.
    fn step(&self, state: &mut PoolState, candles: &[Candle], n: usize, pools: &mut Vec<ZoneCandidate>) {
        let bar = &candles[n];
        let tolerance = self.tolerance;
        state
            .open_highs
            .retain(|s| bar.high <= s.price * (1.0 + tolerance));
        state
            .open_lows
            .retain(|s| bar.low >= s.price * (1.0 - tolerance));

        for swing in confirmed_by(candles, n, self.lookback) {
            let open = match swing.kind {
                SwingKind::High => &mut state.open_highs,
                SwingKind::Low => &mut state.open_lows,
            };
            if let Some(pool) = self.cluster(open, swing) {
                pools.push(pool);
            }
        }
        state.last_seen = Some(bar.timestamp);
    }

    fn cluster(&self, open: &mut Vec<SwingPoint>, swing: SwingPoint) -> Option<ZoneCandidate> {
        let created_at = swing.confirmed_at?;
        let (members, rest): (Vec<SwingPoint>, Vec<SwingPoint>) = std::mem::take(open)
            .into_iter()
            .partition(|o| ((swing.price - o.price) / o.price).abs() <= self.tolerance);
        *open = rest;

        if members.is_empty() {
            open.push(swing);
            return None;
        }

        let prices = members.iter().map(|m| m.price).chain(std::iter::once(swing.price));
        let low = prices.clone().fold(f64::MAX, f64::min);
        let high = prices.fold(f64::MIN, f64::max);
        Some(ZoneCandidate {
            kind: ZoneKind::LiquidityPool,
            bias: match swing.kind {
                SwingKind::High => Direction::Short,
                SwingKind::Low => Direction::Long,
            },
            low,
            high,
            created_at,
            anchor: None,
        })
    }
}

impl PatternRecognizer for LiquidityPoolRecognizer {
    fn kind(&self) -> ZoneKind {
        ZoneKind::LiquidityPool
    }

    fn detect(&self, candles: &[Candle]) -> Result<Vec<ZoneCandidate>, CoreError> {
        self.check_history(candles)?;
        let mut state = PoolState::default();
        let mut pools = Vec::new();
        for n in 0..candles.len() {
            self.step(&mut state, candles, n, &mut pools);
        }
        Ok(pools)
    }

    fn advance(&mut self, candles: &[Candle]) -> Result<Vec<ZoneCandidate>, CoreError> {
        self.check_history(candles)?;
        let start = self
            .state
            .last_seen
            .map_or(0, |t| candles.partition_point(|c| c.timestamp <= t));

        let mut state = std::mem::take(&mut self.state);
        let mut pools = Vec::new();
        for n in start..candles.len() {
            self.step(&mut state, candles, n, &mut pools);
        }
        self.state = state;
        Ok(pools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use chrono::{Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_equal_highs_form_one_pool() {
        let highs = [1.1000, 1.1020, 1.1050, 1.1020, 1.1010, 1.1030, 1.1049, 1.1025, 1.1005];
        let candles: Vec<Candle> = highs
            .iter()
            .enumerate()
            .map(|(i, h)| {
                Candle::new(start() + Duration::minutes(5 * i as i64), Timeframe::M5, h - 0.0005, *h, h - 0.0010, h - 0.0003, 0.0)
            })
            .collect();

        let recognizer = LiquidityPoolRecognizer::new(2, 0.0005);
        let pools = recognizer.detect(&candles).unwrap();
        let highs_pools: Vec<_> = pools.iter().filter(|p| p.bias == Direction::Short).collect();
        assert_eq!(highs_pools.len(), 1);
        assert_eq!((highs_pools[0].low, highs_pools[0].high), (1.1049, 1.1050));
        assert_eq!(highs_pools[0].created_at, candles[8].timestamp);
    }

    #[test]
    fn test_swing_taken_out_leaves_the_open_set() {
        // Low at bar 2 is traded through at bar 5, so the equal low at bar 8
        // has nothing left to pair with.
        let lows = [1.1010, 1.1005, 1.1000, 1.1006, 1.1008, 1.0980, 1.1004, 1.1003, 1.1000, 1.1004, 1.1006];
        let candles: Vec<Candle> = lows
            .iter()
            .enumerate()
            .map(|(i, l)| {
                Candle::new(start() + Duration::minutes(5 * i as i64), Timeframe::M5, l + 0.0005, l + 0.0010, *l, l + 0.0004, 0.0)
            })
            .collect();

        let pools = LiquidityPoolRecognizer::new(2, 0.0005).detect(&candles).unwrap();
        assert!(pools.iter().all(|p| p.bias != Direction::Long));
    }

    #[test]
    fn test_advance_only_reports_new_pools() {
        let lows = [1.1010, 1.1005, 1.1000, 1.1006, 1.1008, 1.1004, 1.1000, 1.1005, 1.1009, 1.1012];
        let candles: Vec<Candle> = lows
            .iter()
            .enumerate()
            .map(|(i, l)| {
                Candle::new(start() + Duration::minutes(5 * i as i64), Timeframe::M5, l + 0.0005, l + 0.0010, *l, l + 0.0004, 0.0)
            })
            .collect();

        let mut recognizer = LiquidityPoolRecognizer::new(2, 0.0005);
        let mut seen = Vec::new();
        for end in 5..=candles.len() {
            seen.extend(recognizer.advance(&candles[..end]).unwrap());
        }
        assert_eq!(seen, recognizer.detect(&candles).unwrap());
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].created_at, candles[8].timestamp);
        assert!(recognizer.advance(&candles).unwrap().is_empty());
    }
}
