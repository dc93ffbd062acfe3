// src/trading/mod.rs
pub mod backtest;
pub mod lifecycle;
pub mod trade_event_logger;
pub mod trades;

pub use lifecycle::TradeLifecycleManager;
pub use trade_event_logger::{write_events_jsonl, NullSink, TradeEventLogger, TradeSink};
pub use trades::{ExitReason, Trade, TradeEvent, TradeEventKind, TradeStatus, TradeSummary};
