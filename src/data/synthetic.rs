// src/data/synthetic.rs
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{Candle, Timeframe};

/// Parameters for a seeded random-walk series. The same parameters always
/// produce the same candles.
#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    pub start: DateTime<Utc>,
    pub timeframe: Timeframe,
    pub bars: usize,
    pub start_price: f64,
    /// Typical per-bar move in price units.
    pub volatility: f64,
    /// Bars between drift regime changes.
    pub regime_length: usize,
    pub seed: u64,
}

impl SyntheticSeries {
    pub fn generate(&self) -> Vec<Candle> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let round = |p: f64| (p * 1e5).round() / 1e5;
        let regime_length = self.regime_length.max(1);

        let mut candles = Vec::with_capacity(self.bars);
        let mut close = self.start_price;
        let mut drift = 0.0;
        for i in 0..self.bars {
            if i % regime_length == 0 {
                drift = rng.gen_range(-0.4..0.4) * self.volatility;
            }
            let open = round(close);
            close = round(open + drift + rng.gen_range(-1.0..1.0) * self.volatility);
            let high = round(open.max(close) + rng.gen_range(0.0..0.6) * self.volatility);
            let low = round(open.min(close) - rng.gen_range(0.0..0.6) * self.volatility);
            let timestamp = self.start + self.timeframe.duration() * i as i32;
            candles.push(Candle::new(
                timestamp,
                self.timeframe,
                open,
                high.max(open).max(close),
                low.min(open).min(close),
                close,
                rng.gen_range(50.0..500.0_f64).round(),
            ));
        }
        candles
    }
}
