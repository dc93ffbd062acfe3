// src/setups/mod.rs
pub mod evaluator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::ConfidenceWeights;
use crate::types::{Direction, Timeframe};

pub use evaluator::{HtfView, MarketView, SetupEvaluator};

/// The three fixed setup recipes.
/// A: trend + sweep + break. B: HTF zone + LTF block + ChoCH.
/// C: block + overlapping gap + fib retracement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionId {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationTag {
    // core
    HtfTrend,
    LiquiditySwept,
    BosAligned,
    PriceInHtfZone,
    LtfOrderBlock,
    ChochConfirmed,
    FvgOverlap,
    FibAligned,
    // bonus only
    MtfAlignment,
    PriorSessionLevels,
    SessionRangeSweep,
    CandlePattern,
}

impl ConfirmationTag {
    fn bonus_weight(&self, weights: &ConfidenceWeights) -> f64 {
        match self {
            ConfirmationTag::MtfAlignment => weights.mtf_alignment,
            ConfirmationTag::PriorSessionLevels => weights.prior_session_levels,
            ConfirmationTag::LiquiditySwept => weights.liquidity_sweep,
            ConfirmationTag::SessionRangeSweep => weights.session_range_sweep,
            ConfirmationTag::CandlePattern => weights.candle_pattern,
            _ => 0.0,
        }
    }
}

/// Most confirmations that count toward sizing.
pub const MAX_CONFIRMATIONS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub confirmations: BTreeSet<ConfirmationTag>,
    pub confidence: f64,
}

/// Core checks each add `weights.core`; bonus checks add their own weight
/// unless the same tag already counted as core. The sum is clamped to the
/// `[min, max]` band.
pub fn score(core: &[ConfirmationTag], bonus: &[ConfirmationTag], weights: &ConfidenceWeights) -> Score {
    let mut confirmations: BTreeSet<ConfirmationTag> = core.iter().copied().collect();
    let mut confidence = confirmations.len() as f64 * weights.core;
    for tag in bonus {
        if confirmations.insert(*tag) {
            confidence += tag.bonus_weight(weights);
        }
    }
    Score {
        confirmations,
        confidence: confidence.clamp(weights.min, weights.max),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupCandidate {
    pub option: OptionId,
    pub symbol: String,
    pub direction: Direction,
    pub timeframe: Timeframe,
    /// Decision time: close of the execution bar that produced the setup.
    pub time: DateTime<Utc>,
    pub confirmations: BTreeSet<ConfirmationTag>,
    pub confidence: f64,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    /// Ids of the zones the setup leaned on.
    pub zone_refs: Vec<String>,
}

impl SetupCandidate {
    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len().min(MAX_CONFIRMATIONS)
    }

    pub fn stop_distance(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    pub fn reward_risk(&self) -> f64 {
        let risk = self.stop_distance();
        if risk > 0.0 {
            (self.target - self.entry).abs() / risk
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VetoReason {
    NewsBlackout,
    OutsideSession,
    HtfRanging,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Candidate(SetupCandidate),
    NoSetup,
    Vetoed(VetoReason),
}
