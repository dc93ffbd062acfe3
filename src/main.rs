// src/main.rs
// Backtest runner: loads candle series (CSV or seeded synthetic), replays them
// through the library and writes the ledger and event journal.
use chrono::{TimeZone, Utc};
use clap::Parser;
use log::{error, info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use setup_detector::data::{load_candles_from_path, SyntheticSeries};
use setup_detector::trading::backtest::write_ledger_csv;
use setup_detector::trading::{write_events_jsonl, NullSink, TradeEventLogger, TradeSink};
use setup_detector::{BacktestSimulator, CoreError, HistoricalData, StrategyConfig, Timeframe};

#[derive(Parser, Debug)]
#[command(name = "setup-detector")]
#[command(about = "Replay candle history through the setup detector and report the trades it would have taken")]
pub struct Args {
    /// Strategy config JSON (defaults, then SETUP_DETECTOR_* overrides, when omitted)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Candle series as SYMBOL:TIMEFRAME:PATH, repeatable (e.g. EURUSD:5m:data/eurusd_5m.csv)
    #[arg(short, long)]
    pub series: Vec<String>,

    /// Build the configured higher timeframes from each symbol's execution series
    #[arg(long)]
    pub derive_htf: bool,

    /// Generate this many days of seeded synthetic execution data per symbol instead of reading CSVs
    #[arg(long)]
    pub synthetic_days: Option<u32>,

    /// Symbols for synthetic data
    #[arg(long, default_value = "EURUSD")]
    pub symbols: Vec<String>,

    /// Seed for synthetic data
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output CSV file for the closed-trade ledger
    #[arg(short, long, default_value = "ledger.csv")]
    pub ledger_out: String,

    /// Output JSON-lines file for the trade event journal
    #[arg(long)]
    pub events_out: Option<String>,

    /// Directory for live per-symbol trade logs (<symbol>_trades.jsonl), written as trades open, move and close
    #[arg(long)]
    pub trade_log_dir: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

pub fn setup_logging(debug: bool) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.target(Target::Stdout);

    if debug {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.filter_level(LevelFilter::Info);
    }

    builder.init();
}

fn load_config(args: &Args) -> Result<StrategyConfig, CoreError> {
    match &args.config {
        Some(path) => {
            let mut config = StrategyConfig::from_json_file(path)?;
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
        None => StrategyConfig::from_env(),
    }
}

fn load_data(args: &Args, config: &StrategyConfig) -> Result<HistoricalData, CoreError> {
    let mut data = HistoricalData::new();
    let execution = config.execution_timeframe;

    if let Some(days) = args.synthetic_days {
        let bars = (days as i64 * 86_400 / execution.seconds()) as usize;
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| CoreError::Parse("synthetic start time".into()))?;
        for (i, symbol) in args.symbols.iter().enumerate() {
            let params = SyntheticSeries {
                start,
                timeframe: execution,
                bars,
                start_price: 1.1,
                volatility: 0.0004,
                regime_length: 96,
                seed: args.seed.wrapping_add(i as u64),
            };
            info!("[Backtest] {} synthetic {} bars on {}", symbol, bars, execution);
            data.insert(symbol, execution, params.generate());
        }
    }

    for entry in &args.series {
        let parts: Vec<&str> = entry.splitn(3, ':').collect();
        let [symbol, timeframe, path] = parts.as_slice() else {
            return Err(CoreError::Parse(format!("series '{}' is not SYMBOL:TIMEFRAME:PATH", entry)));
        };
        let timeframe = Timeframe::from_str(timeframe)?;
        let candles = load_candles_from_path(path, timeframe)?;
        info!("[Backtest] Loaded {} {} candles for {} from {}", candles.len(), timeframe, symbol, path);
        data.insert(symbol, timeframe, candles);
    }

    if args.derive_htf || args.synthetic_days.is_some() {
        let symbols: Vec<String> = data.symbols().map(|s| s.to_string()).collect();
        for symbol in symbols {
            for htf in &config.higher_timeframes {
                if data.timeframes(&symbol).contains(htf) {
                    continue;
                }
                let count = data.derive(&symbol, execution, *htf)?;
                info!("[Backtest] Derived {} {} candles for {}", count, htf, symbol);
            }
        }
    }
    Ok(data)
}

fn trade_log_sink(dir: &Path, symbol: &str) -> Box<dyn TradeSink> {
    let path = dir.join(format!("{}_trades.jsonl", symbol.to_lowercase()));
    match File::create(&path) {
        Ok(file) => {
            info!("[TradeEventLogger] {} trade log at {}", symbol, path.display());
            Box::new(TradeEventLogger::new(BufWriter::new(file)))
        }
        Err(e) => {
            error!(
                "[TradeEventLogger] Cannot create {}: {}. {} trades will not be logged.",
                path.display(),
                e,
                symbol
            );
            Box::new(NullSink)
        }
    }
}

fn run(args: Args) -> Result<(), CoreError> {
    let config = load_config(&args)?;
    let data = load_data(&args, &config)?;
    if data.symbols().next().is_none() {
        warn!("[Backtest] No input series; pass --series or --synthetic-days");
        return Ok(());
    }

    let mut simulator = BacktestSimulator::new(config)?;
    if let Some(dir) = &args.trade_log_dir {
        std::fs::create_dir_all(dir)?;
        let dir = PathBuf::from(dir);
        simulator = simulator.with_sinks(move |symbol| trade_log_sink(&dir, symbol));
    }
    let report = simulator.run(&data)?;

    write_ledger_csv(&report.ledger, BufWriter::new(File::create(&args.ledger_out)?))?;
    info!("[Backtest] Ledger written to {}", args.ledger_out);

    if let Some(path) = &args.events_out {
        let events: Vec<_> = report.events().cloned().collect();
        write_events_jsonl(&events, BufWriter::new(File::create(path)?))?;
        info!("[Backtest] {} events written to {}", events.len(), path);
    }

    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    for (reason, count) in &report.rejections {
        println!("rejected {:>5}  {}", count, reason);
    }
    for (reason, count) in &report.vetoes {
        println!("vetoed   {:>5}  {:?}", count, reason);
    }
    let open = report.open_trades().count();
    if open > 0 {
        println!("{} trade(s) still open at end of data", open);
    }
    println!("ledger fingerprint {}", report.fingerprint);
    Ok(())
}

fn main() {
    dotenv::dotenv().ok();

    let args = Args::parse();
    setup_logging(args.debug);

    if let Err(e) = run(args) {
        error!("[Backtest] {}", e);
        std::process::exit(1);
    }
}
