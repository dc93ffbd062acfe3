// src/zones/zone_detection.rs
// Incremental zone registry for one (symbol, timeframe) series. Runs every
// recognizer over a bounded tail window, registers patterns it has not seen
// and replays mitigation for everything still active.

use chrono::{DateTime, Utc};
use log::{debug, trace};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::{FvgMitigationPolicy, StrategyConfig};
use crate::errors::CoreError;
use crate::types::{Candle, Direction, Timeframe};
use crate::zones::patterns::{
    FairValueGapRecognizer, FibonacciRecognizer, LiquidityPoolRecognizer, OrderBlockRecognizer,
    PatternRecognizer, ZoneCandidate,
};
use crate::zones::{Zone, ZoneKey, ZoneKind};

// ==================== ZONE IDS ====================

/// First 16 hex chars of SHA-256 over the zone's identifying fields.
pub fn generate_deterministic_zone_id(
    symbol: &str,
    timeframe: Timeframe,
    kind: ZoneKind,
    bias: Direction,
    created_at: DateTime<Utc>,
    low: f64,
    high: f64,
) -> String {
    const PRECISION: usize = 8;

    let id_input = format!(
        "{}_{}_{}_{:?}_{}_{:.prec$}_{:.prec$}",
        symbol.to_uppercase(),
        timeframe.label(),
        kind.label(),
        bias,
        created_at.to_rfc3339(),
        low,
        high,
        prec = PRECISION
    );

    let mut hasher = Sha256::new();
    hasher.update(id_input.as_bytes());
    let hex_id = format!("{:x}", hasher.finalize());
    hex_id[..16].to_string()
}

// ==================== DETECTOR ====================

fn sort_candidates(found: &mut [ZoneCandidate]) {
    found.sort_by(|a, b| (a.kind, a.created_at, a.bias).cmp(&(b.kind, b.created_at, b.bias)));
}

pub struct ZoneDetector {
    symbol: String,
    timeframe: Timeframe,
    scan_window: usize,
    max_age_bars: usize,
    policy: FvgMitigationPolicy,
    recognizers: Vec<Box<dyn PatternRecognizer>>,
    zones: BTreeMap<ZoneKey, Zone>,
    last_processed: Option<DateTime<Utc>>,
}

impl ZoneDetector {
    pub fn new(
        symbol: &str,
        timeframe: Timeframe,
        scan_window: usize,
        policy: FvgMitigationPolicy,
        recognizers: Vec<Box<dyn PatternRecognizer>>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            scan_window: scan_window.max(3),
            max_age_bars: usize::MAX,
            policy,
            recognizers,
            zones: BTreeMap::new(),
            last_processed: None,
        }
    }

    /// Unmitigated zones created more than `bars` bars ago are dropped. The
    /// age never goes below the scan window.
    pub fn with_max_age(mut self, bars: usize) -> Self {
        self.max_age_bars = bars.max(self.scan_window);
        self
    }

    pub fn from_config(symbol: &str, timeframe: Timeframe, config: &StrategyConfig) -> Self {
        let lookback = config.lookback(timeframe);
        let recognizers: Vec<Box<dyn PatternRecognizer>> = vec![
            Box::new(OrderBlockRecognizer {
                atr_period: config.atr_period,
                atr_multiplier: config.displacement_atr_multiplier,
                search_bars: config.order_block_search_bars,
            }),
            Box::new(FairValueGapRecognizer),
            Box::new(FibonacciRecognizer {
                lookback,
                ratio: config.fib_ratio,
                tolerance: config.fib_tolerance,
            }),
            Box::new(LiquidityPoolRecognizer::new(
                lookback,
                config.liquidity_cluster_tolerance,
            )),
        ];
        Self::new(
            symbol,
            timeframe,
            config.zone_scan_window,
            config.fvg_mitigation_policy,
            recognizers,
        )
        .with_max_age(config.zone_max_age_bars)
    }

    /// Brings the registry up to date with `candles` (the full append-only
    /// series) and returns the zones registered by this call. Calling it again
    /// with the same candles registers nothing and mitigates nothing.
    pub fn update(&mut self, candles: &[Candle]) -> Vec<Zone> {
        let Some(latest) = candles.last() else {
            return Vec::new();
        };
        if self.last_processed.map_or(false, |t| latest.timestamp <= t) {
            return Vec::new();
        }

        // Existing zones first see the candles that arrived since the last call.
        let start = self
            .last_processed
            .map_or(0, |t| candles.partition_point(|c| c.timestamp <= t));
        for candle in &candles[start..] {
            for zone in self.zones.values_mut().filter(|z| z.is_active()) {
                if zone.observe(candle, self.policy) {
                    trace!(
                        "[ZoneDetector] {}/{} {:?} {} mitigated ({:?}) at {}",
                        self.symbol,
                        self.timeframe,
                        zone.kind,
                        zone.id,
                        zone.mitigation,
                        candle.timestamp
                    );
                }
            }
        }

        let window = &candles[candles.len().saturating_sub(self.scan_window)..];
        let mut fresh = Vec::new();
        for candidate in self.advance(window) {
            // Stamped before the previous call: only a truncated window can
            // produce it now.
            if self.last_processed.map_or(false, |t| candidate.created_at <= t) {
                continue;
            }
            let key = (self.timeframe, candidate.kind, candidate.created_at, candidate.bias);
            if self.zones.contains_key(&key) {
                continue;
            }
            let mut zone = self.materialize(&candidate);
            let after = candles.partition_point(|c| c.timestamp <= zone.created_at);
            for candle in &candles[after..] {
                if zone.observe(candle, self.policy) {
                    break;
                }
            }
            debug!(
                "[ZoneDetector] {}/{} new {:?} {:?} [{:.5}, {:.5}] id={}{}",
                self.symbol,
                self.timeframe,
                zone.kind,
                zone.bias,
                zone.low,
                zone.high,
                zone.id,
                if zone.mitigated { " (already mitigated)" } else { "" }
            );
            self.zones.insert(key, zone.clone());
            fresh.push(zone);
        }

        let age_cutoff = candles
            .len()
            .checked_sub(self.max_age_bars)
            .map(|i| candles[i].timestamp);
        self.prune(window[0].timestamp, age_cutoff);
        self.last_processed = Some(latest.timestamp);
        fresh
    }

    /// Pure scan of a window: every recognizer's candidates, ordered by key.
    /// Recognizers without enough history contribute nothing.
    pub fn scan(&self, window: &[Candle]) -> Vec<ZoneCandidate> {
        let mut found = Vec::new();
        for recognizer in &self.recognizers {
            let result = recognizer.detect(window);
            self.collect(recognizer.kind(), result, &mut found);
        }
        sort_candidates(&mut found);
        found
    }

    /// Like [`scan`](Self::scan) but lets stateful recognizers carry what
    /// they learned from earlier windows.
    fn advance(&mut self, window: &[Candle]) -> Vec<ZoneCandidate> {
        let mut found = Vec::new();
        let mut recognizers = std::mem::take(&mut self.recognizers);
        for recognizer in recognizers.iter_mut() {
            let result = recognizer.advance(window);
            self.collect(recognizer.kind(), result, &mut found);
        }
        self.recognizers = recognizers;
        sort_candidates(&mut found);
        found
    }

    fn collect(
        &self,
        kind: ZoneKind,
        result: Result<Vec<ZoneCandidate>, CoreError>,
        found: &mut Vec<ZoneCandidate>,
    ) {
        match result {
            Ok(candidates) => found.extend(candidates),
            Err(CoreError::InsufficientHistory { needed, available }) => {
                trace!(
                    "[ZoneDetector] {}/{} {:?} skipped: {} of {} candles",
                    self.symbol,
                    self.timeframe,
                    kind,
                    available,
                    needed
                );
            }
            Err(e) => {
                debug!(
                    "[ZoneDetector] {}/{} {:?} failed, no zones this bar: {}",
                    self.symbol,
                    self.timeframe,
                    kind,
                    e
                );
            }
        }
    }

    fn materialize(&self, candidate: &ZoneCandidate) -> Zone {
        let id = generate_deterministic_zone_id(
            &self.symbol,
            self.timeframe,
            candidate.kind,
            candidate.bias,
            candidate.created_at,
            candidate.low,
            candidate.high,
        );
        Zone::new(
            id,
            candidate.kind,
            candidate.bias,
            self.timeframe,
            candidate.low,
            candidate.high,
            candidate.created_at,
            candidate.anchor,
        )
    }

    /// Drops zones mitigated before the scan window and zones created before
    /// the age cutoff, mitigated or not.
    fn prune(&mut self, window_start: DateTime<Utc>, age_cutoff: Option<DateTime<Utc>>) {
        let before = self.zones.len();
        self.zones.retain(|_, z| {
            let fresh_enough = age_cutoff.map_or(true, |cutoff| z.created_at >= cutoff);
            fresh_enough && z.mitigated_at.map_or(true, |t| t >= window_start)
        });
        let removed = before - self.zones.len();
        if removed > 0 {
            trace!(
                "[ZoneDetector] {}/{} pruned {} stale zones",
                self.symbol,
                self.timeframe,
                removed
            );
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// All tracked zones ordered by (kind, created_at, bias).
    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    /// Active zones of one kind and bias, newest first.
    pub fn active(&self, kind: ZoneKind, bias: Direction) -> Vec<&Zone> {
        let mut zones: Vec<&Zone> = self
            .zones
            .values()
            .filter(|z| z.kind == kind && z.bias == bias && z.is_active())
            .collect();
        zones.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        zones
    }

    /// Zones of one kind, any state, newest first.
    pub fn by_kind(&self, kind: ZoneKind) -> Vec<&Zone> {
        let mut zones: Vec<&Zone> = self.zones.values().filter(|z| z.kind == kind).collect();
        zones.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        zones
    }
}
