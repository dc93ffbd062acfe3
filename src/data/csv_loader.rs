// src/data/csv_loader.rs
// Loads OHLCV bars from CSV. Column order is free; headers are matched by name.
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::ReaderBuilder;
use log::{debug, warn};
use std::io::Read;
use std::path::Path;

use crate::errors::CoreError;
use crate::types::{Candle, Timeframe};

struct ColumnIndex {
    time: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

pub fn load_candles_from_path<P: AsRef<Path>>(
    path: P,
    timeframe: Timeframe,
) -> Result<Vec<Candle>, CoreError> {
    let file = std::fs::File::open(path.as_ref())?;
    let candles = load_candles(file, timeframe)?;
    debug!(
        "[CsvLoader] Loaded {} {} candles from {:?}",
        candles.len(),
        timeframe,
        path.as_ref()
    );
    Ok(candles)
}

pub fn load_candles<R: Read>(reader: R, timeframe: Timeframe) -> Result<Vec<Candle>, CoreError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = resolve_columns(rdr.headers()?)?;
    let mut candles = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let field = |idx: usize, name: &str| -> Result<&str, CoreError> {
            record
                .get(idx)
                .ok_or_else(|| CoreError::Parse(format!("row {}: missing '{}'", row + 1, name)))
        };
        let number = |idx: usize, name: &str| -> Result<f64, CoreError> {
            let raw = field(idx, name)?;
            raw.parse::<f64>()
                .map_err(|_| CoreError::Parse(format!("row {}: bad {} '{}'", row + 1, name, raw)))
        };

        let timestamp = parse_timestamp(field(columns.time, "time")?)?;
        let volume = match columns.volume {
            Some(idx) => record
                .get(idx)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0),
            None => 0.0,
        };

        candles.push(Candle::new(
            timestamp,
            timeframe,
            number(columns.open, "open")?,
            number(columns.high, "high")?,
            number(columns.low, "low")?,
            number(columns.close, "close")?,
            volume,
        ));
    }

    if candles.is_empty() {
        warn!("[CsvLoader] No candles found in input");
    }
    Ok(candles)
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<ColumnIndex, CoreError> {
    let mut time_idx = None;
    let mut open_idx = None;
    let mut high_idx = None;
    let mut low_idx = None;
    let mut close_idx = None;
    let mut volume_idx = None;

    for (i, name) in headers.iter().enumerate() {
        match name.to_lowercase().as_str() {
            "_time" | "time" | "timestamp" | "datetime" | "date" => time_idx = Some(i),
            "open" => open_idx = Some(i),
            "high" => high_idx = Some(i),
            "low" => low_idx = Some(i),
            "close" => close_idx = Some(i),
            "volume" | "tick_volume" => volume_idx = Some(i),
            _ => {}
        }
    }

    match (time_idx, open_idx, high_idx, low_idx, close_idx) {
        (Some(time), Some(open), Some(high), Some(low), Some(close)) => Ok(ColumnIndex {
            time,
            open,
            high,
            low,
            close,
            volume: volume_idx,
        }),
        _ => Err(CoreError::Parse(
            "CSV header must contain time, open, high, low and close columns".to_string(),
        )),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or Unix seconds.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(dt);
        }
    }
    Err(CoreError::Parse(format!("unrecognised timestamp '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_shuffled_headers() {
        let data = "close,Open,high,low,time,volume\n\
                    1.1005,1.1000,1.1010,1.0995,2024-03-05T09:00:00Z,120\n\
                    1.1012,1.1005,1.1015,1.1001,2024-03-05 09:05:00,80\n";
        let candles = load_candles(data.as_bytes(), Timeframe::M5).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, 1.1000);
        assert_eq!(candles[1].volume, 80.0);
        assert!(candles[1].timestamp > candles[0].timestamp);
    }

    #[test]
    fn test_unix_seconds_and_missing_columns() {
        assert_eq!(parse_timestamp("1709629200").unwrap().timestamp(), 1709629200);
        let data = "time,open,close\n1709629200,1.0,1.1\n";
        assert!(matches!(
            load_candles(data.as_bytes(), Timeframe::M5),
            Err(CoreError::Parse(_))
        ));
    }
}
