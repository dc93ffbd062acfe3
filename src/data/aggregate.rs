// src/data/aggregate.rs
use log::debug;

use crate::errors::CoreError;
use crate::types::{Candle, Timeframe};

/// Aggregate candles into a larger timeframe. Buckets are aligned to the Unix
/// epoch; a bucket is only emitted once the source series reaches its close,
/// so a trailing partial bucket is dropped.
pub fn aggregate_candles(candles: &[Candle], target: Timeframe) -> Result<Vec<Candle>, CoreError> {
    let Some(first) = candles.first() else {
        return Ok(Vec::new());
    };
    if target.seconds() < first.timeframe.seconds()
        || target.seconds() % first.timeframe.seconds() != 0
    {
        return Err(CoreError::InvalidConfiguration(format!(
            "cannot aggregate {} candles into {}",
            first.timeframe, target
        )));
    }

    let interval = target.seconds();
    let mut aggregated = Vec::new();
    let mut current: Option<Candle> = None;

    for candle in candles {
        let ts = candle.timestamp.timestamp();
        let bucket_start = ts - ts.rem_euclid(interval);

        match current.as_mut() {
            Some(agg) if agg.timestamp.timestamp() == bucket_start => {
                agg.high = agg.high.max(candle.high);
                agg.low = agg.low.min(candle.low);
                agg.close = candle.close;
                agg.volume += candle.volume;
            }
            _ => {
                if let Some(done) = current.take() {
                    aggregated.push(done);
                }
                let start = candle.timestamp - chrono::Duration::seconds(ts - bucket_start);
                current = Some(Candle::new(
                    start,
                    target,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                ));
            }
        }
    }

    if let (Some(last_bucket), Some(last_source)) = (current, candles.last()) {
        if last_source.close_time() == last_bucket.close_time() {
            aggregated.push(last_bucket);
        }
    }

    debug!(
        "[Aggregate] {} {} candles -> {} {} candles",
        candles.len(),
        first.timeframe,
        aggregated.len(),
        target
    );
    Ok(aggregated)
}
