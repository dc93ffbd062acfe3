// src/trading/backtest/mod.rs
pub mod report;
pub mod simulator;

pub use report::{ledger_fingerprint, write_ledger_csv, BacktestReport, EquityPoint, SymbolReport};
pub use simulator::{BacktestSimulator, HistoricalData};
