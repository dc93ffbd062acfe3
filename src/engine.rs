// src/engine.rs
// The "advance one bar" entry point. Live drivers and the backtest simulator
// both feed closed candles through `SymbolPipeline::advance`.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::calendar::Calendar;
use crate::config::StrategyConfig;
use crate::data::CandleStore;
use crate::errors::CoreError;
use crate::filters::SessionTracker;
use crate::risk::{AccountState, RejectReason, RiskDecision, RiskGate};
use crate::setups::{Evaluation, HtfView, MarketView, OptionId, SetupEvaluator, VetoReason};
use crate::structure::{MarketStructureAnalyzer, StructureEvent};
use crate::trading::{Trade, TradeEvent, TradeLifecycleManager, TradeSink};
use crate::types::{Candle, Direction, SymbolClass, Timeframe};
use crate::zones::{Zone, ZoneDetector};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    Vetoed {
        reason: VetoReason,
    },
    Rejected {
        option: OptionId,
        direction: Direction,
        reason: RejectReason,
    },
    Opened {
        trade: Trade,
    },
}

/// What one candle changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarOutcome {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Close time of the candle.
    pub time: DateTime<Utc>,
    pub structure_events: Vec<StructureEvent>,
    pub new_zones: Vec<Zone>,
    pub closed_trades: Vec<Trade>,
    pub decision: Option<Decision>,
}

impl BarOutcome {
    fn new(symbol: &str, timeframe: Timeframe, time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            time,
            structure_events: Vec::new(),
            new_zones: Vec::new(),
            closed_trades: Vec::new(),
            decision: None,
        }
    }

    pub fn opened_trade(&self) -> Option<&Trade> {
        match &self.decision {
            Some(Decision::Opened { trade }) => Some(trade),
            _ => None,
        }
    }
}

// ==================== SYMBOL PIPELINE ====================

/// All per-symbol state. Candles may arrive for any timeframe, but across
/// timeframes they must come in (close time, higher timeframe first) order so
/// that a decision never sees a higher-timeframe bar closing after it.
pub struct SymbolPipeline {
    symbol: String,
    class: SymbolClass,
    config: Arc<StrategyConfig>,
    calendar: Arc<Calendar>,
    store: CandleStore,
    analyzers: BTreeMap<Timeframe, MarketStructureAnalyzer>,
    detectors: BTreeMap<Timeframe, ZoneDetector>,
    session: SessionTracker,
    evaluator: SetupEvaluator,
    gate: RiskGate,
    lifecycle: TradeLifecycleManager,
    account: AccountState,
    clock: Option<(DateTime<Utc>, i64)>,
    vetoes: BTreeMap<VetoReason, usize>,
    rejections: BTreeMap<RejectReason, usize>,
}

impl SymbolPipeline {
    pub fn new(symbol: &str, config: Arc<StrategyConfig>, calendar: Arc<Calendar>) -> Result<Self, CoreError> {
        config.validate()?;

        let mut analyzers = BTreeMap::new();
        let mut detectors = BTreeMap::new();
        for timeframe in config.analyzed_timeframes() {
            analyzers.insert(timeframe, MarketStructureAnalyzer::from_config(&config, timeframe));
            detectors.insert(timeframe, ZoneDetector::from_config(symbol, timeframe, &config));
        }
        let class = SymbolClass::from_symbol(symbol);
        info!(
            "[Pipeline] {} ({:?}) executing on {} with HTFs {:?}",
            symbol, class, config.execution_timeframe, config.higher_timeframes
        );

        Ok(Self {
            symbol: symbol.to_string(),
            class,
            session: SessionTracker::new(config.range_session.clone()),
            evaluator: SetupEvaluator::new(config.clone()),
            gate: RiskGate::new(config.clone()),
            lifecycle: TradeLifecycleManager::new(symbol, config.breakeven_trigger),
            account: AccountState::new(config.initial_balance),
            store: CandleStore::new(),
            analyzers,
            detectors,
            clock: None,
            vetoes: BTreeMap::new(),
            rejections: BTreeMap::new(),
            config,
            calendar,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn TradeSink>) -> Self {
        self.lifecycle = self.lifecycle.with_sink(sink);
        self
    }

    pub fn with_account(mut self, account: AccountState) -> Self {
        self.account = account;
        self
    }

    /// Feeds one closed candle. On the execution timeframe this monitors open
    /// trades, evaluates the option table and runs the risk gate.
    pub fn advance(&mut self, timeframe: Timeframe, candle: Candle) -> Result<BarOutcome, CoreError> {
        let closes_at = candle.close_time();
        let key = (closes_at, -timeframe.seconds());
        if let Some(last) = self.clock {
            if key < last {
                return Err(CoreError::LookaheadViolation {
                    symbol: self.symbol.clone(),
                    timeframe,
                    last: last.0,
                    received: closes_at,
                });
            }
        }

        let series = self.store.append(&self.symbol, timeframe, candle)?;
        self.clock = Some(key);
        let mut outcome = BarOutcome::new(&self.symbol, timeframe, closes_at);

        if let Some(analyzer) = self.analyzers.get_mut(&timeframe) {
            outcome.structure_events = analyzer.update(series);
            for event in &outcome.structure_events {
                debug!(
                    "[Pipeline] {}/{} {:?} {:?} through {:.5}",
                    self.symbol, timeframe, event.kind, event.direction, event.level
                );
            }
        }
        if let Some(detector) = self.detectors.get_mut(&timeframe) {
            outcome.new_zones = detector.update(series);
        }

        if timeframe == self.config.execution_timeframe {
            self.on_execution_bar(&mut outcome)?;
        }
        Ok(outcome)
    }

    fn on_execution_bar(&mut self, outcome: &mut BarOutcome) -> Result<(), CoreError> {
        let Some(candle) = self.store.last(&self.symbol, self.config.execution_timeframe).cloned() else {
            return Ok(());
        };
        self.session.on_candle(&candle);
        self.account = self.account.roll_to(outcome.time);

        for trade in self.lifecycle.on_bar(&candle)? {
            self.account = self.account.with_trade_closed(trade.profit_loss.unwrap_or(0.0));
            outcome.closed_trades.push(trade);
        }
        self.account = self.account.with_unrealized(self.lifecycle.unrealized_pnl(candle.close));

        if self.account.open_positions >= self.config.max_open_positions {
            return Ok(());
        }

        let evaluation = match self.market_view() {
            Some(view) => self.evaluator.evaluate(&view),
            None => Evaluation::NoSetup,
        };
        outcome.decision = match evaluation {
            Evaluation::NoSetup => None,
            Evaluation::Vetoed(reason) => {
                *self.vetoes.entry(reason).or_default() += 1;
                Some(Decision::Vetoed { reason })
            }
            Evaluation::Candidate(candidate) => match self.gate.evaluate(&candidate, &self.account, &self.calendar) {
                RiskDecision::Reject(reason) => {
                    *self.rejections.entry(reason).or_default() += 1;
                    Some(Decision::Rejected {
                        option: candidate.option,
                        direction: candidate.direction,
                        reason,
                    })
                }
                RiskDecision::Approve(plan) => {
                    let id = self.lifecycle.open(&plan);
                    // Backtest fills at the close of the signal bar.
                    let trade = self.lifecycle.fill(&id, candidate.time)?.clone();
                    self.account = plan.apply_to(self.account);
                    Some(Decision::Opened { trade })
                }
            },
        };
        Ok(())
    }

    fn market_view(&self) -> Option<MarketView<'_>> {
        let execution = self.config.execution_timeframe;
        let higher = self
            .config
            .higher_timeframes
            .iter()
            .filter_map(|tf| {
                Some(HtfView {
                    timeframe: *tf,
                    structure: self.analyzers.get(tf)?,
                    zones: self.detectors.get(tf)?,
                })
            })
            .collect();

        Some(MarketView {
            symbol: &self.symbol,
            class: self.class,
            execution: self.store.series(&self.symbol, execution),
            structure: self.analyzers.get(&execution)?,
            zones: self.detectors.get(&execution)?,
            higher,
            session: &self.session,
            calendar: self.calendar.as_ref(),
        })
    }

    /// End of input. Flattens open trades at the last execution close when
    /// configured to; otherwise they are left open and reported as such.
    pub fn finish(&mut self) -> Result<Vec<Trade>, CoreError> {
        if !self.config.close_open_trades_at_end {
            return Ok(Vec::new());
        }
        let Some(last) = self.store.last(&self.symbol, self.config.execution_timeframe).cloned() else {
            return Ok(Vec::new());
        };
        let closed = self.lifecycle.close_all(last.close, last.close_time())?;
        for trade in &closed {
            self.account = self.account.with_trade_closed(trade.profit_loss.unwrap_or(0.0));
        }
        Ok(closed)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn analyzer(&self, timeframe: Timeframe) -> Option<&MarketStructureAnalyzer> {
        self.analyzers.get(&timeframe)
    }

    pub fn detector(&self, timeframe: Timeframe) -> Option<&ZoneDetector> {
        self.detectors.get(&timeframe)
    }

    pub fn candles(&self, timeframe: Timeframe) -> &[Candle] {
        self.store.series(&self.symbol, timeframe)
    }

    pub fn open_trades(&self) -> &[Trade] {
        self.lifecycle.open_trades()
    }

    pub fn closed_trades(&self) -> &[Trade] {
        self.lifecycle.closed_trades()
    }

    pub fn events(&self) -> &[TradeEvent] {
        self.lifecycle.events()
    }

    pub fn vetoes(&self) -> &BTreeMap<VetoReason, usize> {
        &self.vetoes
    }

    pub fn rejections(&self) -> &BTreeMap<RejectReason, usize> {
        &self.rejections
    }
}

// ==================== ENGINE ====================

/// Pipelines for any number of symbols sharing one config and calendar.
pub struct StrategyEngine {
    config: Arc<StrategyConfig>,
    calendar: Arc<Calendar>,
    pipelines: BTreeMap<String, SymbolPipeline>,
}

impl StrategyEngine {
    pub fn new(config: StrategyConfig) -> Result<Self, CoreError> {
        let calendar = Calendar::from_config(&config);
        Self::with_calendar(config, calendar)
    }

    pub fn with_calendar(config: StrategyConfig, calendar: Calendar) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            calendar: Arc::new(calendar),
            pipelines: BTreeMap::new(),
        })
    }

    pub fn push(&mut self, symbol: &str, timeframe: Timeframe, candle: Candle) -> Result<BarOutcome, CoreError> {
        if !self.pipelines.contains_key(symbol) {
            let pipeline = SymbolPipeline::new(symbol, self.config.clone(), self.calendar.clone())?;
            self.pipelines.insert(symbol.to_string(), pipeline);
        }
        match self.pipelines.get_mut(symbol) {
            Some(pipeline) => pipeline.advance(timeframe, candle),
            None => Err(CoreError::InvalidConfiguration(format!("no pipeline for {}", symbol))),
        }
    }

    pub fn pipeline(&self, symbol: &str) -> Option<&SymbolPipeline> {
        self.pipelines.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(|s| s.as_str())
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn engine() -> StrategyEngine {
        let config = StrategyConfig {
            higher_timeframes: vec![Timeframe::H1],
            ..StrategyConfig::default()
        };
        StrategyEngine::with_calendar(config, Calendar::default()).unwrap()
    }

    fn candle(timeframe: Timeframe, ts: DateTime<Utc>) -> Candle {
        Candle::new(ts, timeframe, 1.1, 1.1005, 1.0995, 1.1002, 0.0)
    }

    #[test]
    fn test_higher_timeframe_after_lower_with_same_close_rejected() {
        let mut engine = engine();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        engine.push("EURUSD", Timeframe::M5, candle(Timeframe::M5, t0 + Duration::minutes(55))).unwrap();
        let err = engine.push("EURUSD", Timeframe::H1, candle(Timeframe::H1, t0)).unwrap_err();
        assert!(matches!(err, CoreError::LookaheadViolation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_higher_timeframe_first_accepted() {
        let mut engine = engine();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        engine.push("EURUSD", Timeframe::H1, candle(Timeframe::H1, t0)).unwrap();
        let outcome = engine
            .push("EURUSD", Timeframe::M5, candle(Timeframe::M5, t0 + Duration::minutes(55)))
            .unwrap();
        assert_eq!(outcome.time, t0 + Duration::hours(1));
        assert!(outcome.decision.is_some());
        assert_eq!(engine.symbols().collect::<Vec<_>>(), vec!["EURUSD"]);
    }
}
