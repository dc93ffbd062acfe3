// src/trading/trade_event_logger.rs
// Observers for trade lifecycle transitions plus a JSON-lines journal writer.
use chrono::{DateTime, Utc};
use log::error;
use serde::Serialize;
use std::io::Write;

use crate::errors::CoreError;
use crate::trading::trades::{Trade, TradeEvent, TradeStatus};

/// Callbacks fired by the lifecycle manager. Implementations must not fail the
/// trade; anything that goes wrong is theirs to report.
pub trait TradeSink: Send {
    fn on_open(&mut self, _trade: &Trade) {}
    fn on_stop_adjusted(&mut self, _trade: &Trade, _previous_stop: f64, _at: DateTime<Utc>) {}
    fn on_close(&mut self, _trade: &Trade) {}
}

/// Discards every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TradeSink for NullSink {}

#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TradeEventType {
    TradeOpened,
    StopAdjusted,
    TradeClosed,
}

#[derive(Serialize, Debug)]
pub struct TradeLogEntry<T> {
    pub event_timestamp: DateTime<Utc>,
    pub event_type: TradeEventType,
    pub details: T,
}

#[derive(Serialize, Debug)]
struct StopAdjustment<'a> {
    trade_id: &'a str,
    previous_stop: f64,
    new_stop: f64,
}

/// Writes one JSON object per callback to `writer`.
pub struct TradeEventLogger<W: Write + Send> {
    writer: W,
    written: usize,
}

impl<W: Write + Send> TradeEventLogger<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn entries_written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn log<T: Serialize>(&mut self, event_timestamp: DateTime<Utc>, event_type: TradeEventType, details: T) {
        let entry = TradeLogEntry {
            event_timestamp,
            event_type,
            details,
        };
        match serde_json::to_string(&entry) {
            Ok(json_string) => {
                if let Err(e) = writeln!(self.writer, "{}", json_string) {
                    error!("[TradeEventLogger] Failed to write trade log entry: {}", e);
                    return;
                }
                if let Err(e) = self.writer.flush() {
                    error!("[TradeEventLogger] Failed to flush trade log: {}", e);
                }
                self.written += 1;
            }
            Err(e) => {
                error!("[TradeEventLogger] Failed to serialize trade log entry: {:?}", e);
            }
        }
    }
}

impl<W: Write + Send> TradeSink for TradeEventLogger<W> {
    fn on_open(&mut self, trade: &Trade) {
        let at = trade.fill_time.unwrap_or(trade.entry_time);
        self.log(at, TradeEventType::TradeOpened, trade);
    }

    fn on_stop_adjusted(&mut self, trade: &Trade, previous_stop: f64, at: DateTime<Utc>) {
        let details = StopAdjustment {
            trade_id: &trade.id,
            previous_stop,
            new_stop: trade.stop_loss,
        };
        self.log(at, TradeEventType::StopAdjusted, details);
    }

    fn on_close(&mut self, trade: &Trade) {
        debug_assert!(trade.status() != TradeStatus::Open);
        let at = trade.exit_time.unwrap_or(trade.entry_time);
        self.log(at, TradeEventType::TradeClosed, trade);
    }
}

/// Dumps a finished journal as JSON lines.
pub fn write_events_jsonl<W: Write>(events: &[TradeEvent], mut writer: W) -> Result<(), CoreError> {
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
