// src/trading/backtest/simulator.rs
// Deterministic historical replay. Each symbol's series are merged into one
// stream ordered by (close time, higher timeframe first) and pushed through a
// fresh pipeline; symbols run in parallel and are joined afterwards.

use log::{info, warn};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::calendar::Calendar;
use crate::config::StrategyConfig;
use crate::data::aggregate_candles;
use crate::engine::SymbolPipeline;
use crate::errors::CoreError;
use crate::trading::backtest::report::{BacktestReport, SymbolReport};
use crate::trading::TradeSink;
use crate::types::{Candle, Timeframe};

/// Closed candles per symbol and timeframe.
#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    series: BTreeMap<String, BTreeMap<Timeframe, Vec<Candle>>>,
}

impl HistoricalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.series
            .entry(symbol.to_string())
            .or_default()
            .insert(timeframe, candles);
    }

    /// Builds `target` for `symbol` by aggregating its `source` series.
    pub fn derive(&mut self, symbol: &str, source: Timeframe, target: Timeframe) -> Result<usize, CoreError> {
        let candles = aggregate_candles(self.series(symbol, source), target)?;
        let count = candles.len();
        self.insert(symbol, target, candles);
        Ok(count)
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> &[Candle] {
        self.series
            .get(symbol)
            .and_then(|by_tf| by_tf.get(&timeframe))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|s| s.as_str())
    }

    pub fn timeframes(&self, symbol: &str) -> Vec<Timeframe> {
        self.series
            .get(symbol)
            .map(|by_tf| by_tf.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// Strictly increasing timestamps, all of the declared timeframe.
fn validate_series(symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> Result<(), CoreError> {
    for candle in candles {
        if candle.timeframe != timeframe {
            return Err(CoreError::TimeframeMismatch {
                expected: timeframe,
                received: candle.timeframe,
            });
        }
    }
    for pair in candles.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(CoreError::LookaheadViolation {
                symbol: symbol.to_string(),
                timeframe,
                last: pair[0].timestamp,
                received: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

pub struct BacktestSimulator {
    config: Arc<StrategyConfig>,
    calendar: Arc<Calendar>,
    sink_factory: Option<Box<dyn Fn(&str) -> Box<dyn TradeSink> + Send + Sync>>,
}

impl BacktestSimulator {
    pub fn new(config: StrategyConfig) -> Result<Self, CoreError> {
        let calendar = Calendar::from_config(&config);
        Self::with_calendar(config, calendar)
    }

    pub fn with_calendar(config: StrategyConfig, calendar: Calendar) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            calendar: Arc::new(calendar),
            sink_factory: None,
        })
    }

    /// Attaches a trade sink to every symbol's pipeline.
    pub fn with_sinks<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn TradeSink> + Send + Sync + 'static,
    {
        self.sink_factory = Some(Box::new(factory));
        self
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn run(&self, data: &HistoricalData) -> Result<BacktestReport, CoreError> {
        let symbols: Vec<(&String, &BTreeMap<Timeframe, Vec<Candle>>)> = data.series.iter().collect();
        info!(
            "[Backtest] Replaying {} symbol(s), execution {} HTFs {:?}",
            symbols.len(),
            self.config.execution_timeframe,
            self.config.higher_timeframes
        );

        let reports = symbols
            .par_iter()
            .map(|(symbol, series)| self.replay_symbol(symbol, series))
            .collect::<Result<Vec<SymbolReport>, CoreError>>()?;

        let report = BacktestReport::aggregate(reports, self.config.initial_balance)?;
        info!(
            "[Backtest] Done: {} trades, P&L {:.2}, win rate {:.1}%, fingerprint {}",
            report.summary.total_trades,
            report.summary.total_profit_loss,
            report.summary.win_rate,
            &report.fingerprint[..16]
        );
        Ok(report)
    }

    fn replay_symbol(&self, symbol: &str, series: &BTreeMap<Timeframe, Vec<Candle>>) -> Result<SymbolReport, CoreError> {
        for (timeframe, candles) in series {
            validate_series(symbol, *timeframe, candles)?;
        }

        let mut merged: Vec<&Candle> = series.values().flatten().collect();
        merged.sort_by_key(|c| (c.close_time(), Reverse(c.timeframe)));

        let mut pipeline = SymbolPipeline::new(symbol, self.config.clone(), self.calendar.clone())?;
        if let Some(factory) = &self.sink_factory {
            pipeline = pipeline.with_sink(factory(symbol));
        }

        for candle in merged {
            match pipeline.advance(candle.timeframe, candle.clone()) {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(
                    "[Backtest] {} {} candle at {} skipped: {}",
                    symbol, candle.timeframe, candle.timestamp, e
                ),
            }
        }
        pipeline.finish()?;

        let report = SymbolReport::from_pipeline(&pipeline, self.config.initial_balance);
        info!(
            "[Backtest] {}: {} closed, {} open, P&L {:.2}",
            symbol,
            report.ledger.len(),
            report.open_trades.len(),
            report.summary.total_profit_loss
        );
        Ok(report)
    }
}
