// tests/common/mod.rs
//
// Hand-built candle tables shared by the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use setup_detector::{Candle, StrategyConfig, Timeframe};
use std::collections::BTreeMap;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Tuesday 2024-03-05 09:00 UTC, inside the London session.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()
}

/// Price 1.0300 plus `pips` pips.
pub fn px(pips: f64) -> f64 {
    1.0300 + pips * 0.0001
}

pub fn m5(i: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
    Candle::new(t0() + Duration::minutes(5 * i), Timeframe::M5, px(o), px(h), px(l), px(c), 100.0)
}

/// 23 five-minute bars: swing high 1.0350 (bar 11), equal-ish lows 1.0304 /
/// 1.0303 forming a pool that bar 17 sweeps down to the 1.0300 swing low, then
/// a rally whose last bar closes at 1.0360 through the 1.0350 high.
pub fn bos_scenario_m5() -> Vec<Candle> {
    let rows: [(f64, f64, f64, f64); 23] = [
        (20.0, 22.0, 18.0, 21.0),
        (21.0, 26.0, 20.0, 25.0),
        (25.0, 31.0, 24.0, 30.0),
        (30.0, 36.0, 29.0, 35.0),
        (35.0, 40.0, 33.0, 34.0),
        (34.0, 35.0, 25.0, 26.0),
        (26.0, 28.0, 15.0, 16.0),
        (16.0, 18.0, 4.0, 10.0),
        (10.0, 20.0, 8.0, 19.0),
        (19.0, 30.0, 18.0, 29.0),
        (29.0, 38.0, 27.0, 37.0),
        (37.0, 50.0, 35.0, 36.0),
        (36.0, 37.0, 25.0, 26.0),
        (26.0, 27.0, 14.0, 15.0),
        (15.0, 16.0, 3.0, 8.0),
        (8.0, 18.0, 7.0, 17.0),
        (17.0, 19.0, 12.0, 14.0),
        (14.0, 15.0, 0.0, 10.0),
        (10.0, 22.0, 9.0, 21.0),
        (21.0, 33.0, 20.0, 32.0),
        (32.0, 44.0, 31.0, 43.0),
        (43.0, 48.0, 41.0, 47.0),
        (47.0, 61.0, 46.0, 60.0),
    ];
    rows.iter()
        .enumerate()
        .map(|(i, (o, h, l, c))| m5(i as i64, *o, *h, *l, *c))
        .collect()
}

/// 30 steadily rising hourly bars, the last one closing at `t0()`.
pub fn rising_h1() -> Vec<Candle> {
    (0..30)
        .map(|i| {
            let base = 1.0010 + 0.0010 * i as f64;
            Candle::new(
                t0() - Duration::hours(30 - i),
                Timeframe::H1,
                base,
                base + 0.0025,
                base - 0.0015,
                base + 0.0010,
                1_000.0,
            )
        })
        .collect()
}

/// Defaults with 5m execution, a single 1h higher timeframe and k = 2.
pub fn scenario_config() -> StrategyConfig {
    let mut lookback_window = BTreeMap::new();
    lookback_window.insert(Timeframe::M5, 2);
    lookback_window.insert(Timeframe::H1, 2);
    StrategyConfig {
        execution_timeframe: Timeframe::M5,
        higher_timeframes: vec![Timeframe::H1],
        lookback_window,
        ..StrategyConfig::default()
    }
}

/// Straight-line series: every bar moves `step` from the previous one.
pub fn monotone(timeframe: Timeframe, bars: usize, start: f64, step: f64) -> Vec<Candle> {
    (0..bars)
        .map(|i| {
            let open = start + step * i as f64;
            let close = open + step;
            let wick = step.abs() * 0.25;
            Candle::new(
                t0() + timeframe.duration() * i as i32,
                timeframe,
                open,
                open.max(close) + wick,
                open.min(close) - wick,
                close,
                0.0,
            )
        })
        .collect()
}
