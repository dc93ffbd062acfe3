// src/errors.rs
use chrono::{DateTime, Utc};

use crate::trading::trades::TradeStatus;
use crate::types::Timeframe;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Insufficient history: needed {needed} candles, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Lookahead violation on {symbol}/{timeframe}: candle at {received} does not follow {last}")]
    LookaheadViolation {
        symbol: String,
        timeframe: Timeframe,
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    #[error("Timeframe mismatch: series is {expected}, candle is {received}")]
    TimeframeMismatch {
        expected: Timeframe,
        received: Timeframe,
    },

    #[error("Invalid candle at {0}")]
    InvalidCandle(String),

    #[error("Trade {trade_id} cannot move from {from:?} to {to:?}")]
    InvalidTradeTransition {
        trade_id: String,
        from: TradeStatus,
        to: TradeStatus,
    },

    #[error("Unknown trade: {0}")]
    UnknownTrade(String),

    #[error("Data parsing error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Configuration and lookahead errors abort a run; everything else
    /// degrades to "no signal" for the bar that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidConfiguration(_) | CoreError::LookaheadViolation { .. }
        )
    }
}
