// tests/backtest_tests.rs
//
// End-to-end replays through the backtest simulator: the sweep + BOS
// scenario, trade sinks, determinism of the ledger and lookahead protection.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::*;
use setup_detector::data::SyntheticSeries;
use setup_detector::setups::OptionId;
use setup_detector::trading::backtest::write_ledger_csv;
use setup_detector::trading::{
    write_events_jsonl, ExitReason, Trade, TradeEventLogger, TradeSink, TradeStatus,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use setup_detector::{
    BacktestReport, BacktestSimulator, CoreError, Decision, Direction, HistoricalData, StrategyConfig,
    StrategyEngine, Timeframe,
};

fn scenario_data(symbols: &[&str]) -> HistoricalData {
    let mut data = HistoricalData::new();
    for symbol in symbols {
        data.insert(symbol, Timeframe::H1, rising_h1());
        data.insert(symbol, Timeframe::M5, bos_scenario_m5());
    }
    data
}

fn synthetic_data(symbols: &[(&str, u64)]) -> HistoricalData {
    let mut data = HistoricalData::new();
    for (symbol, seed) in symbols {
        let m5 = SyntheticSeries {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            timeframe: Timeframe::M5,
            bars: 288 * 10,
            start_price: 1.0850,
            volatility: 0.0004,
            regime_length: 60,
            seed: *seed,
        }
        .generate();
        data.insert(symbol, Timeframe::M5, m5);
        data.derive(symbol, Timeframe::M5, Timeframe::H1).unwrap();
        data.derive(symbol, Timeframe::M5, Timeframe::H4).unwrap();
    }
    data
}

/// The scenario plus a bar that runs 135 pips in favour (past the breakeven
/// trigger, short of the target) and one that falls back through entry.
fn breakeven_data() -> HistoricalData {
    let mut bars = bos_scenario_m5();
    bars.push(m5(23, 60.0, 195.0, 58.0, 190.0));
    bars.push(m5(24, 190.0, 192.0, 50.0, 55.0));
    let mut data = HistoricalData::new();
    data.insert("EURUSD", Timeframe::H1, rising_h1());
    data.insert("EURUSD", Timeframe::M5, bars);
    data
}

fn single_trade_config() -> StrategyConfig {
    StrategyConfig {
        max_trades_per_day: 1,
        ..scenario_config()
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl TradeSink for RecordingSink {
    fn on_open(&mut self, trade: &Trade) {
        self.lines.lock().unwrap().push(format!(
            "open {} {} entry={:.5} stop={:.5}",
            trade.symbol, trade.id, trade.entry_price, trade.stop_loss
        ));
    }

    fn on_stop_adjusted(&mut self, trade: &Trade, previous_stop: f64, at: chrono::DateTime<Utc>) {
        self.lines.lock().unwrap().push(format!(
            "stop {} {:.5}->{:.5} at {}",
            trade.id, previous_stop, trade.stop_loss, at
        ));
    }

    fn on_close(&mut self, trade: &Trade) {
        self.lines.lock().unwrap().push(format!(
            "close {} {:?} {:?} at {:?}",
            trade.id, trade.exit_reason, trade.profit_loss, trade.exit_time
        ));
    }
}

/// Cloneable in-memory writer so the test can read what a sink wrote after
/// the simulator has dropped it.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn ledger_bytes(report: &BacktestReport) -> Vec<u8> {
    let mut bytes = Vec::new();
    write_ledger_csv(&report.ledger, &mut bytes).unwrap();
    bytes
}

#[test]
fn sweep_then_bos_opens_one_full_risk_long() {
    init_logging();
    let simulator = BacktestSimulator::new(scenario_config()).unwrap();
    let report = simulator.run(&scenario_data(&["EURUSD"])).unwrap();

    assert!(report.ledger.is_empty());
    let open: Vec<_> = report.open_trades().collect();
    assert_eq!(open.len(), 1);

    let trade = open[0];
    assert_eq!(trade.direction, Direction::Long);
    assert_eq!(trade.option, OptionId::A);
    assert_eq!(trade.status(), TradeStatus::Open);
    assert_eq!(trade.setup().confirmation_count(), 3);
    assert!((trade.risk_percent - 1.0).abs() < 1e-12);
    assert!((trade.entry_price - 1.0360).abs() < 1e-9);
    assert!((trade.stop_loss - 1.0298).abs() < 1e-9);
    assert!((trade.take_profit - 1.0546).abs() < 1e-9);
    // Filled at the close of the signal bar.
    let signal_bar = &bos_scenario_m5()[22];
    assert_eq!(trade.entry_time, signal_bar.close_time());

    let account = &report.symbols[0].final_account;
    assert_eq!(account.trades_today, 1);
    assert_eq!(account.open_positions, 1);
}

#[test]
fn open_trade_is_closed_at_end_when_configured() {
    let config = StrategyConfig {
        close_open_trades_at_end: true,
        ..scenario_config()
    };
    let report = BacktestSimulator::new(config)
        .unwrap()
        .run(&scenario_data(&["EURUSD"]))
        .unwrap();

    assert_eq!(report.open_trades().count(), 0);
    assert_eq!(report.ledger.len(), 1);
    let trade = &report.ledger[0];
    // Closed at the last close, which is the entry price.
    assert_eq!(trade.status(), TradeStatus::ClosedBreakeven);
    assert_eq!(trade.profit_loss, Some(0.0));
    assert_eq!(report.summary.total_trades, 1);
    assert_eq!(report.equity_curve.len(), 1);

    let mut jsonl = Vec::new();
    assert_eq!(report.events().count(), report.symbols[0].events.len());
    write_events_jsonl(&report.symbols[0].events, &mut jsonl).unwrap();
    let text = String::from_utf8(jsonl).unwrap();
    let kinds: Vec<&str> = text
        .lines()
        .map(|line| {
            if line.contains("\"opened\"") {
                "opened"
            } else if line.contains("\"filled\"") {
                "filled"
            } else if line.contains("\"closed\"") {
                "closed"
            } else {
                "other"
            }
        })
        .collect();
    assert_eq!(kinds, vec!["opened", "filled", "closed"]);
}

#[test]
fn sinks_see_open_then_breakeven_then_close() {
    init_logging();
    let sink = RecordingSink::default();
    let factory_sink = sink.clone();
    let simulator = BacktestSimulator::new(single_trade_config())
        .unwrap()
        .with_sinks(move |_symbol: &str| Box::new(factory_sink.clone()) as Box<dyn TradeSink>);
    let report = simulator.run(&breakeven_data()).unwrap();

    assert_eq!(report.ledger.len(), 1);
    let trade = &report.ledger[0];
    assert_eq!(trade.status(), TradeStatus::ClosedBreakeven);
    assert_eq!(trade.exit_reason, Some(ExitReason::Breakeven));

    let bars = bos_scenario_m5();
    let moved_at = bars[22].close_time() + Duration::minutes(5);
    let closed_at = moved_at + Duration::minutes(5);
    let lines = sink.lines.lock().unwrap().clone();
    assert_eq!(
        lines,
        vec![
            format!("open EURUSD {} entry=1.03600 stop=1.02980", trade.id),
            format!("stop {} 1.02980->1.03600 at {}", trade.id, moved_at),
            format!(
                "close {} {:?} {:?} at {:?}",
                trade.id,
                Some(ExitReason::Breakeven),
                Some(0.0),
                Some(closed_at)
            ),
        ]
    );
}

#[test]
fn trade_event_logger_writes_one_json_line_per_callback() {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    let simulator = BacktestSimulator::new(single_trade_config())
        .unwrap()
        .with_sinks(move |_symbol: &str| {
            Box::new(TradeEventLogger::new(writer.clone())) as Box<dyn TradeSink>
        });
    let report = simulator.run(&breakeven_data()).unwrap();
    let trade_id = report.ledger[0].id.clone();

    let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    let entries: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let types: Vec<&str> = entries
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["trade_opened", "stop_adjusted", "trade_closed"]);

    assert_eq!(entries[0]["details"]["id"], trade_id.as_str());
    let adjusted = &entries[1]["details"];
    assert_eq!(adjusted["trade_id"], trade_id.as_str());
    assert!((adjusted["previous_stop"].as_f64().unwrap() - 1.0298).abs() < 1e-9);
    assert!((adjusted["new_stop"].as_f64().unwrap() - 1.0360).abs() < 1e-9);
    assert_eq!(entries[2]["details"]["profit_loss"].as_f64(), Some(0.0));
}

#[test]
fn replay_is_deterministic() {
    init_logging();
    let config = StrategyConfig {
        close_open_trades_at_end: true,
        higher_timeframes: vec![Timeframe::H4, Timeframe::H1],
        ..StrategyConfig::default()
    };
    let data = synthetic_data(&[("EURUSD", 42), ("GBPUSD", 7)]);

    let first = BacktestSimulator::new(config.clone()).unwrap().run(&data).unwrap();
    let second = BacktestSimulator::new(config).unwrap().run(&data).unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(ledger_bytes(&first), ledger_bytes(&second));
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.vetoes, second.vetoes);
    assert_eq!(first.rejections, second.rejections);
}

#[test]
fn parallel_symbols_match_isolated_runs() {
    let config = StrategyConfig {
        close_open_trades_at_end: true,
        ..StrategyConfig::default()
    };
    let simulator = BacktestSimulator::new(config).unwrap();
    let together = simulator
        .run(&synthetic_data(&[("EURUSD", 3), ("USDJPY", 5)]))
        .unwrap();

    for (symbol, seed) in [("EURUSD", 3), ("USDJPY", 5)] {
        let alone = simulator.run(&synthetic_data(&[(symbol, seed)])).unwrap();
        let joint = together
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .unwrap();
        assert_eq!(joint.ledger, alone.symbols[0].ledger);
        assert_eq!(joint.final_account, alone.symbols[0].final_account);
    }
    assert_eq!(
        together.summary.initial_balance,
        2.0 * simulator.config().initial_balance
    );
}

#[test]
fn out_of_order_series_aborts_the_run() {
    init_logging();
    let mut m5 = bos_scenario_m5();
    m5.swap(5, 6);
    let mut data = HistoricalData::new();
    data.insert("EURUSD", Timeframe::M5, m5);
    data.insert("EURUSD", Timeframe::H1, rising_h1());

    let err = BacktestSimulator::new(scenario_config())
        .unwrap()
        .run(&data)
        .unwrap_err();
    assert!(matches!(err, CoreError::LookaheadViolation { .. }));
}

#[test]
fn live_engine_rejects_higher_timeframe_bar_delivered_late() {
    init_logging();
    let mut engine = StrategyEngine::new(scenario_config()).unwrap();
    let h1 = rising_h1();
    for candle in &h1 {
        engine.push("EURUSD", Timeframe::H1, candle.clone()).unwrap();
    }
    let m5 = bos_scenario_m5();
    for candle in &m5[..12] {
        engine.push("EURUSD", Timeframe::M5, candle.clone()).unwrap();
    }

    // The 09:00 hourly bar closes at 10:00, before the 5m bars already seen.
    let late = setup_detector::Candle::new(
        h1[29].timestamp + Duration::hours(1),
        Timeframe::H1,
        1.0310,
        1.0340,
        1.0300,
        1.0330,
        0.0,
    );
    let err = engine.push("EURUSD", Timeframe::H1, late).unwrap_err();
    assert!(matches!(err, CoreError::LookaheadViolation { .. }));
}

#[test]
fn live_engine_matches_backtest_decision() {
    let mut engine = StrategyEngine::new(scenario_config()).unwrap();
    for candle in rising_h1() {
        engine.push("EURUSD", Timeframe::H1, candle).unwrap();
    }
    let mut opened = Vec::new();
    for candle in bos_scenario_m5() {
        let outcome = engine.push("EURUSD", Timeframe::M5, candle).unwrap();
        if let Some(Decision::Opened { trade }) = outcome.decision {
            opened.push(trade);
        }
    }
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].option, OptionId::A);

    let pipeline = engine.pipeline("EURUSD").unwrap();
    assert_eq!(pipeline.open_trades().len(), 1);
    assert_eq!(pipeline.open_trades()[0].id, opened[0].id);
}
