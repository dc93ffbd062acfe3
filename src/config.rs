// src/config.rs
use dotenv::dotenv;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use crate::calendar::{BlackoutWindow, SessionWindow};
use crate::errors::CoreError;
use crate::setups::OptionId;
use crate::types::{SymbolClass, Timeframe};

const ENV_PREFIX: &str = "SETUP_DETECTOR_";

/// How a fair value gap is considered consumed by later price action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FvgMitigationPolicy {
    /// A later candle's range covers the whole gap.
    FullFill,
    /// Price trades through the gap midpoint.
    Midpoint,
    /// Any trade inside the gap.
    AnyTouch,
}

/// Risk per trade, in percent of balance, keyed by confirmation count.
/// Three confirmations take `full`, two take `half`, fewer are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFractions {
    pub full: f64,
    pub half: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Price increment of one pip.
    pub pip_size: f64,
    /// Account-currency value of one pip for one unit of size.
    pub pip_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    /// Weight of each passed core check.
    pub core: f64,
    pub mtf_alignment: f64,
    pub prior_session_levels: f64,
    pub liquidity_sweep: f64,
    pub session_range_sweep: f64,
    pub candle_pattern: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            core: 0.20,
            mtf_alignment: 0.05,
            prior_session_levels: 0.05,
            liquidity_sweep: 0.05,
            session_range_sweep: 0.05,
            candle_pattern: 0.05,
            min: 0.60,
            max: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    // --- Timeframes ---
    pub execution_timeframe: Timeframe,
    /// Checked in order; the first non-ranging trend is the HTF bias.
    pub higher_timeframes: Vec<Timeframe>,

    // --- Market structure ---
    pub lookback_window: BTreeMap<Timeframe, usize>,
    pub default_lookback: usize,
    pub trend_window: usize,

    // --- Zones ---
    pub atr_period: usize,
    pub displacement_atr_multiplier: f64,
    pub order_block_search_bars: usize,
    pub fvg_mitigation_policy: FvgMitigationPolicy,
    pub fib_ratio: f64,
    /// Relative half-width of the fib band (0.005 = 0.5% of price).
    pub fib_tolerance: f64,
    /// Relative distance within which swing points cluster into a pool.
    pub liquidity_cluster_tolerance: f64,
    pub zone_scan_window: usize,
    /// Zones older than this many bars are forgotten even while unmitigated.
    pub zone_max_age_bars: usize,

    // --- Setup evaluation ---
    pub event_lookback_bars: usize,
    pub sweep_lookback_bars: usize,
    pub confidence: ConfidenceWeights,
    pub option_priority_by_symbol_class: BTreeMap<SymbolClass, Vec<OptionId>>,
    pub stop_buffer_pips: f64,
    pub target_reward_risk: f64,

    // --- Risk ---
    pub confirmation_to_risk_fraction: RiskFractions,
    pub stop_pip_bounds: PipBounds,
    pub min_reward_risk_ratio: f64,
    pub max_trades_per_day: u32,
    /// Percent of balance.
    pub daily_loss_limit: f64,
    /// Percent of balance.
    pub weekly_loss_limit: f64,
    pub max_open_positions: u32,
    pub instruments: BTreeMap<SymbolClass, InstrumentSpec>,

    // --- Calendar ---
    pub session_windows: Vec<SessionWindow>,
    pub range_session: SessionWindow,
    pub news_blackout_windows: Vec<BlackoutWindow>,

    // --- Lifecycle / simulation ---
    pub breakeven_trigger: f64,
    pub initial_balance: f64,
    pub close_open_trades_at_end: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let mut priorities = BTreeMap::new();
        priorities.insert(SymbolClass::Major, vec![OptionId::A, OptionId::B, OptionId::C]);
        priorities.insert(SymbolClass::Jpy, vec![OptionId::A, OptionId::B, OptionId::C]);
        priorities.insert(SymbolClass::Metal, vec![OptionId::B, OptionId::A, OptionId::C]);
        priorities.insert(SymbolClass::Index, vec![OptionId::A, OptionId::B, OptionId::C]);

        let mut instruments = BTreeMap::new();
        instruments.insert(SymbolClass::Major, InstrumentSpec { pip_size: 0.0001, pip_value: 10.0 });
        instruments.insert(SymbolClass::Jpy, InstrumentSpec { pip_size: 0.01, pip_value: 10.0 });
        instruments.insert(SymbolClass::Metal, InstrumentSpec { pip_size: 0.1, pip_value: 10.0 });
        instruments.insert(SymbolClass::Index, InstrumentSpec { pip_size: 1.0, pip_value: 1.0 });

        Self {
            execution_timeframe: Timeframe::M5,
            higher_timeframes: vec![Timeframe::H4, Timeframe::H1],
            lookback_window: BTreeMap::new(),
            default_lookback: 3,
            trend_window: 20,
            atr_period: 14,
            displacement_atr_multiplier: 1.5,
            order_block_search_bars: 5,
            fvg_mitigation_policy: FvgMitigationPolicy::FullFill,
            fib_ratio: 0.79,
            fib_tolerance: 0.005,
            liquidity_cluster_tolerance: 0.0005,
            zone_scan_window: 200,
            zone_max_age_bars: 600,
            event_lookback_bars: 3,
            sweep_lookback_bars: 12,
            confidence: ConfidenceWeights::default(),
            option_priority_by_symbol_class: priorities,
            stop_buffer_pips: 2.0,
            target_reward_risk: 3.0,
            confirmation_to_risk_fraction: RiskFractions { full: 1.0, half: 0.5 },
            stop_pip_bounds: PipBounds { min: 30.0, max: 150.0 },
            min_reward_risk_ratio: 2.0,
            max_trades_per_day: 2,
            daily_loss_limit: 1.5,
            weekly_loss_limit: 3.0,
            max_open_positions: 1,
            instruments,
            session_windows: vec![
                SessionWindow::new("london", 8, 17),
                SessionWindow::new("new_york", 13, 22),
            ],
            range_session: SessionWindow::new("asia", 0, 9),
            news_blackout_windows: Vec::new(),
            breakeven_trigger: 0.70,
            initial_balance: 10_000.0,
            close_open_trades_at_end: false,
        }
    }
}

impl StrategyConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: StrategyConfig = serde_json::from_str(&raw)?;
        info!("[Config] Loaded strategy config from {:?}", path.as_ref());
        Ok(config)
    }

    /// Loads `.env`, reads the file named by `SETUP_DETECTOR_CONFIG` when set,
    /// applies scalar overrides and validates.
    pub fn from_env() -> Result<Self, CoreError> {
        dotenv().ok();
        let mut config = match std::env::var(format!("{}CONFIG", ENV_PREFIX)) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), CoreError> {
        if let Some(v) = env_override::<u32>("MAX_TRADES_PER_DAY")? {
            self.max_trades_per_day = v;
        }
        if let Some(v) = env_override::<f64>("DAILY_LOSS_LIMIT")? {
            self.daily_loss_limit = v;
        }
        if let Some(v) = env_override::<f64>("WEEKLY_LOSS_LIMIT")? {
            self.weekly_loss_limit = v;
        }
        if let Some(v) = env_override::<f64>("INITIAL_BALANCE")? {
            self.initial_balance = v;
        }
        Ok(())
    }

    pub fn lookback(&self, timeframe: Timeframe) -> usize {
        self.lookback_window
            .get(&timeframe)
            .copied()
            .unwrap_or(self.default_lookback)
    }

    pub fn priority_for(&self, class: SymbolClass) -> &[OptionId] {
        const FALLBACK: [OptionId; 3] = [OptionId::A, OptionId::B, OptionId::C];
        self.option_priority_by_symbol_class
            .get(&class)
            .map(|v| v.as_slice())
            .unwrap_or(&FALLBACK)
    }

    pub fn instrument(&self, class: SymbolClass) -> InstrumentSpec {
        self.instruments
            .get(&class)
            .copied()
            .unwrap_or(InstrumentSpec { pip_size: 0.0001, pip_value: 10.0 })
    }

    /// Timeframes the pipeline analyzes: the execution timeframe plus every HTF.
    pub fn analyzed_timeframes(&self) -> BTreeSet<Timeframe> {
        let mut set: BTreeSet<Timeframe> = self.higher_timeframes.iter().copied().collect();
        set.insert(self.execution_timeframe);
        set
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |msg: String| Err(CoreError::InvalidConfiguration(msg));

        if self.default_lookback == 0 || self.lookback_window.values().any(|k| *k == 0) {
            return invalid("lookback window must be at least 1 bar".into());
        }
        if self.trend_window < 2 {
            return invalid(format!("trend_window {} must be at least 2", self.trend_window));
        }
        for htf in &self.higher_timeframes {
            if *htf <= self.execution_timeframe {
                return invalid(format!(
                    "higher timeframe {} is not above execution timeframe {}",
                    htf, self.execution_timeframe
                ));
            }
        }
        if self.atr_period == 0 || self.order_block_search_bars == 0 {
            return invalid("atr_period and order_block_search_bars must be positive".into());
        }
        if !(self.displacement_atr_multiplier > 0.0) {
            return invalid(format!(
                "displacement_atr_multiplier {} must be positive",
                self.displacement_atr_multiplier
            ));
        }
        if !(self.fib_ratio > 0.0 && self.fib_ratio < 1.0) {
            return invalid(format!("fib_ratio {} must lie in (0, 1)", self.fib_ratio));
        }
        if !(self.fib_tolerance >= 0.0) || !(self.liquidity_cluster_tolerance >= 0.0) {
            return invalid("zone tolerances must be non-negative".into());
        }
        if self.zone_scan_window < 3 {
            return invalid("zone_scan_window must cover at least 3 candles".into());
        }
        let widest_swing = self
            .lookback_window
            .values()
            .copied()
            .chain(std::iter::once(self.default_lookback))
            .max()
            .unwrap_or(self.default_lookback);
        if self.zone_scan_window < 2 * widest_swing + 1 {
            return invalid(format!(
                "zone_scan_window {} cannot confirm a swing with lookback {}",
                self.zone_scan_window, widest_swing
            ));
        }
        if self.zone_max_age_bars < self.zone_scan_window {
            return invalid(format!(
                "zone_max_age_bars {} is shorter than zone_scan_window {}",
                self.zone_max_age_bars, self.zone_scan_window
            ));
        }

        let c = &self.confidence;
        if !(0.0 <= c.min && c.min <= c.max && c.max <= 1.0) {
            return invalid(format!("confidence band [{}, {}] is not within [0, 1]", c.min, c.max));
        }
        let weights = [
            c.core,
            c.mtf_alignment,
            c.prior_session_levels,
            c.liquidity_sweep,
            c.session_range_sweep,
            c.candle_pattern,
        ];
        if weights.iter().any(|w| !(*w >= 0.0)) {
            return invalid("confidence weights must be non-negative".into());
        }

        for (class, options) in &self.option_priority_by_symbol_class {
            let unique: BTreeSet<_> = options.iter().collect();
            if options.is_empty() || unique.len() != options.len() {
                return invalid(format!(
                    "option priority for {:?} must be a non-empty list without repeats",
                    class
                ));
            }
        }
        if !(self.stop_buffer_pips >= 0.0) || !(self.target_reward_risk > 0.0) {
            return invalid("stop_buffer_pips must be >= 0 and target_reward_risk > 0".into());
        }

        let r = &self.confirmation_to_risk_fraction;
        if !(r.half > 0.0 && r.half <= r.full && r.full <= 100.0) {
            return invalid(format!(
                "risk fractions half={} full={} must satisfy 0 < half <= full <= 100",
                r.half, r.full
            ));
        }
        let b = &self.stop_pip_bounds;
        if !(b.min > 0.0 && b.min <= b.max) {
            return invalid(format!("stop pip bounds [{}, {}] are invalid", b.min, b.max));
        }
        if !(self.min_reward_risk_ratio > 0.0) {
            return invalid("min_reward_risk_ratio must be positive".into());
        }
        if self.max_trades_per_day == 0 || self.max_open_positions == 0 {
            return invalid("trade count limits must be at least 1".into());
        }
        if !(self.daily_loss_limit > 0.0) || !(self.weekly_loss_limit > 0.0) {
            return invalid("loss limits must be positive percentages".into());
        }
        for (class, spec) in &self.instruments {
            if !(spec.pip_size > 0.0) || !(spec.pip_value > 0.0) {
                return invalid(format!("instrument spec for {:?} must be positive", class));
            }
        }

        for window in self.session_windows.iter().chain(std::iter::once(&self.range_session)) {
            window.validate()?;
        }
        for window in &self.news_blackout_windows {
            if window.end < window.start {
                return invalid(format!("news window '{}' ends before it starts", window.label));
            }
        }

        if !(self.breakeven_trigger > 0.0 && self.breakeven_trigger <= 1.0) {
            return invalid(format!(
                "breakeven_trigger {} must lie in (0, 1]",
                self.breakeven_trigger
            ));
        }
        if !(self.initial_balance > 0.0) {
            return invalid("initial_balance must be positive".into());
        }

        debug!("[Config] Strategy configuration validated");
        Ok(())
    }
}

fn env_override<T: FromStr>(key: &str) -> Result<Option<T>, CoreError> {
    let name = format!("{}{}", ENV_PREFIX, key);
    match std::env::var(&name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CoreError::InvalidConfiguration(format!("{} has invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StrategyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lookback(Timeframe::M5), 3);
        assert_eq!(config.priority_for(SymbolClass::Metal)[0], OptionId::B);
    }

    #[test]
    fn test_negative_risk_fraction_is_rejected() {
        let mut config = StrategyConfig::default();
        config.confirmation_to_risk_fraction.half = -0.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_htf_must_be_above_execution() {
        let mut config = StrategyConfig::default();
        config.higher_timeframes = vec![Timeframe::M1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "max_trades_per_day": 4, "lookback_window": { "5m": 2, "1h": 4 } }"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_trades_per_day, 4);
        assert_eq!(config.lookback(Timeframe::M5), 2);
        assert_eq!(config.lookback(Timeframe::H4), 3);
        assert_eq!(config.stop_pip_bounds.max, 150.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zone_windows_must_fit_together() {
        let mut config = StrategyConfig::default();
        config.zone_max_age_bars = config.zone_scan_window - 1;
        assert!(config.validate().is_err());

        let mut config = StrategyConfig::default();
        config.zone_scan_window = 6;
        config.zone_max_age_bars = 6;
        assert!(config.validate().is_err());
        config.zone_scan_window = 7;
        assert!(config.validate().is_ok());
    }
}
