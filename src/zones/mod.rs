// src/zones/mod.rs
pub mod patterns;
pub mod zone_detection;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FvgMitigationPolicy;
use crate::types::{Candle, Direction, Timeframe};

pub use zone_detection::{generate_deterministic_zone_id, ZoneDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ZoneKind {
    OrderBlock,
    #[serde(rename = "FVG")]
    Fvg,
    FibLevel,
    LiquidityPool,
}

impl ZoneKind {
    pub fn label(&self) -> &'static str {
        match self {
            ZoneKind::OrderBlock => "order_block",
            ZoneKind::Fvg => "fvg",
            ZoneKind::FibLevel => "fib_level",
            ZoneKind::LiquidityPool => "liquidity_pool",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mitigation {
    /// Gap traded through according to the FVG policy.
    Filled,
    /// Close beyond the distal edge (order block) or the leg origin (fib).
    Invalidated,
    /// Pool traded through and closed back inside.
    Swept,
    /// Pool traded through without closing back inside.
    Taken,
}

/// Dedupe key. Bias is part of it so that a bar forming both a high and a low
/// pool keeps both.
pub type ZoneKey = (Timeframe, ZoneKind, DateTime<Utc>, Direction);

/// A price zone. Only `ZoneDetector` creates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Zone {
    pub id: String,
    pub kind: ZoneKind,
    /// Trade direction the zone supports.
    pub bias: Direction,
    pub timeframe: Timeframe,
    pub low: f64,
    pub high: f64,
    /// Open time of the candle that completed the pattern.
    pub created_at: DateTime<Utc>,
    pub mitigated: bool,
    pub mitigated_at: Option<DateTime<Utc>>,
    pub mitigation: Option<Mitigation>,
    /// Leg origin for fib levels.
    pub anchor: Option<f64>,
    #[serde(default)]
    sweep_pending: bool,
}

impl Zone {
    pub(crate) fn new(
        id: String,
        kind: ZoneKind,
        bias: Direction,
        timeframe: Timeframe,
        low: f64,
        high: f64,
        created_at: DateTime<Utc>,
        anchor: Option<f64>,
    ) -> Self {
        Self {
            id,
            kind,
            bias,
            timeframe,
            low,
            high,
            created_at,
            mitigated: false,
            mitigated_at: None,
            mitigation: None,
            anchor,
            sweep_pending: false,
        }
    }

    pub fn key(&self) -> ZoneKey {
        (self.timeframe, self.kind, self.created_at, self.bias)
    }

    pub fn is_active(&self) -> bool {
        !self.mitigated
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    pub fn overlaps(&self, low: f64, high: f64) -> bool {
        self.low <= high && low <= self.high
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn is_swept(&self) -> bool {
        self.mitigation == Some(Mitigation::Swept)
    }

    /// Applies one later candle. Returns true when this candle mitigated the
    /// zone; an already mitigated zone never changes again.
    pub(crate) fn observe(&mut self, candle: &Candle, policy: FvgMitigationPolicy) -> bool {
        if self.mitigated || candle.timestamp <= self.created_at {
            return false;
        }
        let outcome = match self.kind {
            ZoneKind::OrderBlock => self.order_block_outcome(candle),
            ZoneKind::Fvg => self.gap_outcome(candle, policy),
            ZoneKind::FibLevel => self.fib_outcome(candle),
            ZoneKind::LiquidityPool => self.pool_outcome(candle),
        };
        match outcome {
            Some(how) => {
                self.mitigated = true;
                self.mitigated_at = Some(candle.timestamp);
                self.mitigation = Some(how);
                self.sweep_pending = false;
                true
            }
            None => false,
        }
    }

    fn order_block_outcome(&self, candle: &Candle) -> Option<Mitigation> {
        let broken = match self.bias {
            Direction::Long => candle.close < self.low,
            Direction::Short => candle.close > self.high,
        };
        broken.then_some(Mitigation::Invalidated)
    }

    fn gap_outcome(&self, candle: &Candle, policy: FvgMitigationPolicy) -> Option<Mitigation> {
        let filled = match (policy, self.bias) {
            (FvgMitigationPolicy::FullFill, _) => candle.low <= self.low && candle.high >= self.high,
            (FvgMitigationPolicy::Midpoint, Direction::Long) => candle.low <= self.midpoint(),
            (FvgMitigationPolicy::Midpoint, Direction::Short) => candle.high >= self.midpoint(),
            (FvgMitigationPolicy::AnyTouch, Direction::Long) => candle.low <= self.high,
            (FvgMitigationPolicy::AnyTouch, Direction::Short) => candle.high >= self.low,
        };
        filled.then_some(Mitigation::Filled)
    }

    fn fib_outcome(&self, candle: &Candle) -> Option<Mitigation> {
        let anchor = self.anchor?;
        let broken = match self.bias {
            Direction::Long => candle.close < anchor,
            Direction::Short => candle.close > anchor,
        };
        broken.then_some(Mitigation::Invalidated)
    }

    fn pool_outcome(&mut self, candle: &Candle) -> Option<Mitigation> {
        // Short bias: pool of highs, swept upward. Long bias: pool of lows.
        let (through, back_inside) = match self.bias {
            Direction::Short => (candle.high > self.high, candle.close < self.high),
            Direction::Long => (candle.low < self.low, candle.close > self.low),
        };
        if self.sweep_pending {
            return Some(if back_inside { Mitigation::Swept } else { Mitigation::Taken });
        }
        if through {
            if back_inside {
                return Some(Mitigation::Swept);
            }
            self.sweep_pending = true;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap() + Duration::minutes(5 * i)
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(at(i), Timeframe::M5, open, high, low, close, 0.0)
    }

    fn zone(kind: ZoneKind, bias: Direction, low: f64, high: f64) -> Zone {
        Zone::new("z".into(), kind, bias, Timeframe::M5, low, high, at(0), None)
    }

    #[test]
    fn test_fvg_full_fill_policy() {
        let mut gap = zone(ZoneKind::Fvg, Direction::Long, 1.1000, 1.1010);
        assert!(!gap.observe(&bar(1, 1.1020, 1.1025, 1.1005, 1.1015), FvgMitigationPolicy::FullFill));
        assert!(gap.observe(&bar(2, 1.1015, 1.1020, 1.0995, 1.1000), FvgMitigationPolicy::FullFill));
        assert_eq!(gap.mitigation, Some(Mitigation::Filled));
        // One-way: nothing reverses it.
        assert!(!gap.observe(&bar(3, 1.1030, 1.1040, 1.1025, 1.1035), FvgMitigationPolicy::FullFill));
        assert!(gap.mitigated);
    }

    #[test]
    fn test_fvg_touch_policies() {
        let mut mid = zone(ZoneKind::Fvg, Direction::Long, 1.1000, 1.1010);
        assert!(mid.observe(&bar(1, 1.1020, 1.1025, 1.1004, 1.1015), FvgMitigationPolicy::Midpoint));
        let mut touch = zone(ZoneKind::Fvg, Direction::Short, 1.1000, 1.1010);
        assert!(touch.observe(&bar(1, 1.0990, 1.1001, 1.0985, 1.0995), FvgMitigationPolicy::AnyTouch));
    }

    #[test]
    fn test_pool_sweep_within_following_bar() {
        let mut pool = zone(ZoneKind::LiquidityPool, Direction::Short, 1.1048, 1.1050);
        // Trades through and closes above: pending.
        assert!(!pool.observe(&bar(1, 1.1045, 1.1056, 1.1044, 1.1053), FvgMitigationPolicy::FullFill));
        // Next bar closes back below: swept.
        assert!(pool.observe(&bar(2, 1.1053, 1.1054, 1.1040, 1.1042), FvgMitigationPolicy::FullFill));
        assert!(pool.is_swept());

        let mut taken = zone(ZoneKind::LiquidityPool, Direction::Long, 1.1000, 1.1002);
        assert!(!taken.observe(&bar(1, 1.1005, 1.1006, 1.0990, 1.0995), FvgMitigationPolicy::FullFill));
        assert!(taken.observe(&bar(2, 1.0995, 1.0998, 1.0980, 1.0985), FvgMitigationPolicy::FullFill));
        assert_eq!(taken.mitigation, Some(Mitigation::Taken));
    }

    #[test]
    fn test_order_block_distal_break() {
        let mut ob = zone(ZoneKind::OrderBlock, Direction::Long, 1.1000, 1.1010);
        assert!(!ob.observe(&bar(1, 1.1005, 1.1008, 1.0995, 1.1002), FvgMitigationPolicy::FullFill));
        assert!(ob.observe(&bar(2, 1.1002, 1.1003, 1.0990, 1.0995), FvgMitigationPolicy::FullFill));
        assert_eq!(ob.mitigation, Some(Mitigation::Invalidated));
    }
}
