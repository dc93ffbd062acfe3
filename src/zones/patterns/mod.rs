// src/zones/patterns/mod.rs
pub mod fair_value_gap;
pub mod fibonacci;
pub mod liquidity_pool;
pub mod order_block;

use chrono::{DateTime, Utc};

use crate::errors::CoreError;
use crate::types::{Candle, Direction};
use crate::zones::ZoneKind;

pub use fair_value_gap::FairValueGapRecognizer;
pub use fibonacci::FibonacciRecognizer;
pub use liquidity_pool::LiquidityPoolRecognizer;
pub use order_block::{average_true_range, OrderBlockRecognizer};

/// Raw pattern output before the detector assigns an id and tracks mitigation.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneCandidate {
    pub kind: ZoneKind,
    pub bias: Direction,
    pub low: f64,
    pub high: f64,
    pub created_at: DateTime<Utc>,
    pub anchor: Option<f64>,
}

pub trait PatternRecognizer: Send + Sync {
    fn kind(&self) -> ZoneKind;

    /// Scans an ordered candle window. Every candidate must be derived only
    /// from candles up to and including the one stamped `created_at`.
    fn detect(&self, candles: &[Candle]) -> Result<Vec<ZoneCandidate>, CoreError>;

    /// Called by the detector once per update with the tail window. Stateless
    /// recognizers rescan it; stateful ones only look at candles they have
    /// not seen before.
    fn advance(&mut self, candles: &[Candle]) -> Result<Vec<ZoneCandidate>, CoreError> {
        self.detect(candles)
    }
}
