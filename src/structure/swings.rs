// src/structure/swings.rs
// Swing points are local extrema over +/- k bars. A candidate needs k bars on
// its left; it becomes confirmed once k bars exist on its right. Equal
// extremes inside the window resolve to the most recent bar: the left side is
// compared with >= / <= and the right side strictly.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub kind: SwingKind,
    pub confirmed: bool,
    /// Position of the swing candle in the series it was found in.
    pub index: usize,
    /// Open time of the bar that confirmed the swing, when confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
}

fn left_holds(candles: &[Candle], i: usize, k: usize, kind: SwingKind) -> bool {
    if i < k {
        return false;
    }
    candles[i - k..i].iter().all(|c| match kind {
        SwingKind::High => candles[i].high >= c.high,
        SwingKind::Low => candles[i].low <= c.low,
    })
}

fn right_holds(candles: &[Candle], i: usize, k: usize, kind: SwingKind) -> bool {
    let end = (i + k + 1).min(candles.len());
    candles[i + 1..end].iter().all(|c| match kind {
        SwingKind::High => candles[i].high > c.high,
        SwingKind::Low => candles[i].low < c.low,
    })
}

fn point(candles: &[Candle], i: usize, k: usize, kind: SwingKind) -> SwingPoint {
    let confirmed_idx = i + k;
    let confirmed = confirmed_idx < candles.len();
    SwingPoint {
        time: candles[i].timestamp,
        price: match kind {
            SwingKind::High => candles[i].high,
            SwingKind::Low => candles[i].low,
        },
        kind,
        confirmed,
        index: i,
        confirmed_at: confirmed.then(|| candles[confirmed_idx].timestamp),
    }
}

/// Swing points confirmed by the bar at index `n`, i.e. the candidate at `n - k`.
pub fn confirmed_by(candles: &[Candle], n: usize, k: usize) -> Vec<SwingPoint> {
    if k == 0 || n < 2 * k || n >= candles.len() {
        return Vec::new();
    }
    let c = n - k;
    [SwingKind::High, SwingKind::Low]
        .into_iter()
        .filter(|kind| left_holds(candles, c, k, *kind) && right_holds(candles, c, k, *kind))
        .map(|kind| point(candles, c, k, kind))
        .collect()
}

/// All swing points of a series in bar order. Trailing candidates that still
/// lack k right-hand bars are included with `confirmed = false`.
pub fn find_swings(candles: &[Candle], k: usize) -> Vec<SwingPoint> {
    let mut swings = Vec::new();
    if k == 0 || candles.len() < k + 1 {
        return swings;
    }
    for i in k..candles.len() {
        for kind in [SwingKind::High, SwingKind::Low] {
            if left_holds(candles, i, k, kind) && right_holds(candles, i, k, kind) {
                swings.push(point(candles, i, k, kind));
            }
        }
    }
    swings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use chrono::{Duration, TimeZone};

    fn series(highs: &[f64], lows: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        highs
            .iter()
            .zip(lows)
            .enumerate()
            .map(|(i, (h, l))| {
                let mid = (h + l) / 2.0;
                Candle::new(start + Duration::minutes(5 * i as i64), Timeframe::M5, mid, *h, *l, mid, 0.0)
            })
            .collect()
    }

    #[test]
    fn test_equal_highs_prefer_most_recent() {
        let candles = series(&[1.0, 2.0, 3.0, 3.0, 2.0, 1.0], &[0.5; 6]);
        let highs: Vec<_> = find_swings(&candles, 2)
            .into_iter()
            .filter(|s| s.kind == SwingKind::High)
            .collect();
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].index, 3);
        assert!(highs[0].confirmed);
        assert_eq!(highs[0].confirmed_at, Some(candles[5].timestamp));
    }

    #[test]
    fn test_trailing_candidate_is_unconfirmed() {
        let candles = series(&[1.0, 2.0, 3.0, 4.0, 3.5], &[0.5, 0.6, 0.7, 0.8, 0.9]);
        let swings = find_swings(&candles, 2);
        let high = swings.iter().find(|s| s.kind == SwingKind::High).unwrap();
        assert_eq!(high.index, 3);
        assert!(!high.confirmed);
        assert!(confirmed_by(&candles, 4, 2).is_empty());
    }

    #[test]
    fn test_confirmed_by_matches_full_scan() {
        let candles = series(&[1.0, 3.0, 2.0, 1.5, 2.5, 4.0, 3.0, 2.0], &[0.9, 2.0, 1.0, 0.8, 1.2, 3.0, 2.5, 1.0]);
        let mut incremental = Vec::new();
        for n in 0..candles.len() {
            incremental.extend(confirmed_by(&candles, n, 2));
        }
        let full: Vec<_> = find_swings(&candles, 2).into_iter().filter(|s| s.confirmed).collect();
        assert_eq!(incremental, full);
    }
}
