// src/trading/backtest/report.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;

use crate::engine::SymbolPipeline;
use crate::errors::CoreError;
use crate::risk::{AccountState, RejectReason};
use crate::setups::{OptionId, VetoReason};
use crate::trading::trades::{ExitReason, Trade, TradeEvent, TradeStatus, TradeSummary};
use crate::types::Direction;

#[derive(Debug, Clone, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub summary: TradeSummary,
    /// Closed trades in exit order.
    pub ledger: Vec<Trade>,
    pub open_trades: Vec<Trade>,
    pub events: Vec<TradeEvent>,
    pub final_account: AccountState,
    pub vetoes: BTreeMap<VetoReason, usize>,
    pub rejections: BTreeMap<RejectReason, usize>,
}

impl SymbolReport {
    pub fn from_pipeline(pipeline: &SymbolPipeline, initial_balance: f64) -> Self {
        let ledger = pipeline.closed_trades().to_vec();
        Self {
            symbol: pipeline.symbol().to_string(),
            summary: TradeSummary::from_trades(&ledger, initial_balance),
            ledger,
            open_trades: pipeline.open_trades().to_vec(),
            events: pipeline.events().to_vec(),
            final_account: *pipeline.account(),
            vetoes: pipeline.vetoes().clone(),
            rejections: pipeline.rejections().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub summary: TradeSummary,
    /// Every symbol's closed trades ordered by (exit time, symbol, id).
    pub ledger: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub symbols: Vec<SymbolReport>,
    pub vetoes: BTreeMap<VetoReason, usize>,
    pub rejections: BTreeMap<RejectReason, usize>,
    /// SHA-256 of the ledger CSV; equal across identical runs.
    pub fingerprint: String,
}

impl BacktestReport {
    /// Fork-join step: merges per-symbol results. Each symbol trades its own
    /// account, so the aggregate starts from `initial_balance` per symbol.
    pub fn aggregate(mut symbols: Vec<SymbolReport>, initial_balance: f64) -> Result<Self, CoreError> {
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut ledger: Vec<Trade> = symbols.iter().flat_map(|s| s.ledger.iter().cloned()).collect();
        ledger.sort_by(|a, b| {
            (a.exit_time, &a.symbol, &a.id).cmp(&(b.exit_time, &b.symbol, &b.id))
        });

        let starting = initial_balance * symbols.len() as f64;
        let summary = TradeSummary::from_trades(&ledger, starting);

        let mut balance = starting;
        let equity_curve = ledger
            .iter()
            .filter_map(|t| {
                balance += t.profit_loss.unwrap_or(0.0);
                t.exit_time.map(|time| EquityPoint { time, balance })
            })
            .collect();

        let mut vetoes = BTreeMap::new();
        let mut rejections = BTreeMap::new();
        for s in &symbols {
            for (reason, count) in &s.vetoes {
                *vetoes.entry(*reason).or_insert(0) += count;
            }
            for (reason, count) in &s.rejections {
                *rejections.entry(*reason).or_insert(0) += count;
            }
        }

        let fingerprint = ledger_fingerprint(&ledger)?;
        Ok(Self {
            summary,
            ledger,
            equity_curve,
            symbols,
            vetoes,
            rejections,
            fingerprint,
        })
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &Trade> {
        self.symbols.iter().flat_map(|s| s.open_trades.iter())
    }

    pub fn events(&self) -> impl Iterator<Item = &TradeEvent> {
        self.symbols.iter().flat_map(|s| s.events.iter())
    }
}

// ==================== LEDGER CSV ====================

#[derive(Serialize)]
struct LedgerRow<'a> {
    id: &'a str,
    symbol: &'a str,
    option: OptionId,
    direction: Direction,
    status: TradeStatus,
    confirmations: usize,
    confidence: f64,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
    lot_size: f64,
    risk_percent: f64,
    exit_time: Option<DateTime<Utc>>,
    exit_price: Option<f64>,
    exit_reason: Option<ExitReason>,
    profit_loss_pips: Option<f64>,
    profit_loss: Option<f64>,
}

impl<'a> From<&'a Trade> for LedgerRow<'a> {
    fn from(trade: &'a Trade) -> Self {
        Self {
            id: &trade.id,
            symbol: &trade.symbol,
            option: trade.option,
            direction: trade.direction,
            status: trade.status(),
            confirmations: trade.setup().confirmation_count(),
            confidence: trade.setup().confidence,
            entry_time: trade.entry_time,
            entry_price: trade.entry_price,
            stop_loss: trade.initial_stop_loss,
            take_profit: trade.take_profit,
            lot_size: trade.lot_size,
            risk_percent: trade.risk_percent,
            exit_time: trade.exit_time,
            exit_price: trade.exit_price,
            exit_reason: trade.exit_reason,
            profit_loss_pips: trade.profit_loss_pips,
            profit_loss: trade.profit_loss,
        }
    }
}

pub fn write_ledger_csv<W: Write>(trades: &[Trade], writer: W) -> Result<(), CoreError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for trade in trades {
        csv_writer.serialize(LedgerRow::from(trade))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn ledger_fingerprint(trades: &[Trade]) -> Result<String, CoreError> {
    let mut bytes = Vec::new();
    write_ledger_csv(trades, &mut bytes)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_run_aggregates_cleanly() {
        let report = BacktestReport::aggregate(Vec::new(), 10_000.0).unwrap();
        assert_eq!(report.summary.total_trades, 0);
        assert!(report.equity_curve.is_empty());
        assert_eq!(report.fingerprint, ledger_fingerprint(&[]).unwrap());
        assert_eq!(report.fingerprint.len(), 64);
    }
}
