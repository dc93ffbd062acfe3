// src/lib.rs
pub mod calendar;
pub mod config;
pub mod data;
pub mod engine;
pub mod errors;
pub mod filters;
pub mod risk;
pub mod setups;
pub mod structure;
pub mod trading;
pub mod types;
pub mod zones;

pub use config::StrategyConfig;
pub use engine::{BarOutcome, Decision, StrategyEngine, SymbolPipeline};
pub use errors::CoreError;
pub use trading::backtest::{BacktestReport, BacktestSimulator, HistoricalData};
pub use types::{Candle, Direction, Timeframe, TrendState};
