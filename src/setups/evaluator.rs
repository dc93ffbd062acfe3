// src/setups/evaluator.rs
// Option table evaluation. Macro vetoes first, then the options in the symbol
// class's priority order; the first option whose core checks all pass wins.

use chrono::{DateTime, Utc};
use log::{debug, trace};
use std::sync::Arc;

use crate::calendar::Calendar;
use crate::config::StrategyConfig;
use crate::filters::{engulfing, SessionTracker};
use crate::setups::{score, ConfirmationTag, Evaluation, OptionId, SetupCandidate, VetoReason};
use crate::structure::{MarketStructureAnalyzer, StructureKind, SwingKind};
use crate::types::{Candle, Direction, SymbolClass, Timeframe};
use crate::zones::{Zone, ZoneDetector, ZoneKind};

/// Structure and zones of one higher timeframe.
pub struct HtfView<'a> {
    pub timeframe: Timeframe,
    pub structure: &'a MarketStructureAnalyzer,
    pub zones: &'a ZoneDetector,
}

/// Everything the evaluator may look at for one decision. All of it reflects
/// candles closed at or before the last execution candle.
pub struct MarketView<'a> {
    pub symbol: &'a str,
    pub class: SymbolClass,
    pub execution: &'a [Candle],
    pub structure: &'a MarketStructureAnalyzer,
    pub zones: &'a ZoneDetector,
    /// Higher timeframes in configured priority order.
    pub higher: Vec<HtfView<'a>>,
    pub session: &'a SessionTracker,
    pub calendar: &'a Calendar,
}

impl<'a> MarketView<'a> {
    fn last(&self) -> Option<&'a Candle> {
        self.execution.last()
    }
}

/// An option whose core checks passed, before bonuses and targets.
struct Draft {
    option: OptionId,
    direction: Direction,
    core: Vec<ConfirmationTag>,
    stop: f64,
    zone_refs: Vec<String>,
}

pub struct SetupEvaluator {
    config: Arc<StrategyConfig>,
}

impl SetupEvaluator {
    pub fn new(config: Arc<StrategyConfig>) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, view: &MarketView) -> Evaluation {
        let Some(last) = view.last() else {
            return Evaluation::NoSetup;
        };
        let decided_at = last.close_time();

        if let Some(window) = view.calendar.blackout_at(decided_at) {
            trace!("[SetupEvaluator] {} vetoed at {}: blackout '{}'", view.symbol, decided_at, window.label);
            return Evaluation::Vetoed(VetoReason::NewsBlackout);
        }
        if !view.calendar.in_session(decided_at) {
            trace!("[SetupEvaluator] {} vetoed at {}: outside session", view.symbol, decided_at);
            return Evaluation::Vetoed(VetoReason::OutsideSession);
        }
        let Some(htf_direction) = Self::htf_direction(view) else {
            trace!("[SetupEvaluator] {} vetoed at {}: HTF ranging", view.symbol, decided_at);
            return Evaluation::Vetoed(VetoReason::HtfRanging);
        };

        for option in self.config.priority_for(view.class) {
            let draft = match option {
                OptionId::A => self.option_a(view, last, htf_direction),
                OptionId::B => self.option_b(view, last),
                OptionId::C => self.option_c(view, last),
            };
            if let Some(draft) = draft {
                let candidate = self.finish(view, last, draft);
                debug!(
                    "[SetupEvaluator] {} option {:?} {:?} at {}: entry {:.5} stop {:.5} target {:.5}, {} confirmations, confidence {:.2}",
                    view.symbol,
                    candidate.option,
                    candidate.direction,
                    decided_at,
                    candidate.entry,
                    candidate.stop,
                    candidate.target,
                    candidate.confirmation_count(),
                    candidate.confidence
                );
                return Evaluation::Candidate(candidate);
            }
        }
        Evaluation::NoSetup
    }

    /// First higher timeframe with a clear trend. Without higher timeframes the
    /// execution timeframe's own trend stands in.
    fn htf_direction(view: &MarketView) -> Option<Direction> {
        if view.higher.is_empty() {
            return view.structure.trend().direction();
        }
        view.higher.iter().find_map(|h| h.structure.trend().direction())
    }

    /// Start of the window covering the last `bars` execution candles.
    fn since(last: &Candle, bars: usize) -> DateTime<Utc> {
        last.timestamp - last.timeframe.duration() * (bars.max(1) as i32 - 1)
    }

    fn recent_sweep<'z>(&self, zones: &'z ZoneDetector, direction: Direction, last: &Candle) -> Option<&'z Zone> {
        let since = Self::since(last, self.config.sweep_lookback_bars);
        zones
            .by_kind(ZoneKind::LiquidityPool)
            .into_iter()
            .filter(|z| z.bias == direction && z.is_swept() && z.mitigated_at.map_or(false, |t| t >= since))
            .max_by_key(|z| z.mitigated_at)
    }

    /// Stop placed `stop_buffer_pips` beyond `anchor`; None when that lands on
    /// the wrong side of the entry.
    fn stop_beyond(&self, view: &MarketView, direction: Direction, anchor: f64, entry: f64) -> Option<f64> {
        let buffer = self.config.stop_buffer_pips * self.config.instrument(view.class).pip_size;
        let stop = anchor - direction.sign() * buffer;
        let valid = match direction {
            Direction::Long => stop < entry,
            Direction::Short => stop > entry,
        };
        valid.then_some(stop)
    }

    fn distal(zone: &Zone, direction: Direction) -> f64 {
        match direction {
            Direction::Long => zone.low,
            Direction::Short => zone.high,
        }
    }

    // ==================== OPTION A ====================

    fn option_a(&self, view: &MarketView, last: &Candle, direction: Direction) -> Option<Draft> {
        let pool = self.recent_sweep(view.zones, direction, last)?;
        let since = Self::since(last, self.config.event_lookback_bars);
        let bos = view
            .structure
            .events_since(since)
            .find(|e| e.kind == StructureKind::Bos && e.direction.as_direction() == direction)?;

        // Protective swing on the far side of the move.
        let swing_kind = match direction {
            Direction::Long => SwingKind::Low,
            Direction::Short => SwingKind::High,
        };
        let anchor = match view.structure.latest_swing(swing_kind) {
            Some(swing) => swing.price,
            None => {
                let tail = &view.execution[view.execution.len().saturating_sub(self.config.sweep_lookback_bars.max(1))..];
                match direction {
                    Direction::Long => tail.iter().map(|c| c.low).fold(f64::MAX, f64::min),
                    Direction::Short => tail.iter().map(|c| c.high).fold(f64::MIN, f64::max),
                }
            }
        };
        let stop = self.stop_beyond(view, direction, anchor, last.close)?;

        trace!(
            "[SetupEvaluator] {} option A: pool {} swept, {:?} through {:.5}",
            view.symbol,
            pool.id,
            bos.kind,
            bos.level
        );
        Some(Draft {
            option: OptionId::A,
            direction,
            core: vec![ConfirmationTag::HtfTrend, ConfirmationTag::LiquiditySwept, ConfirmationTag::BosAligned],
            stop,
            zone_refs: vec![pool.id.clone()],
        })
    }

    // ==================== OPTION B ====================

    fn option_b(&self, view: &MarketView, last: &Candle) -> Option<Draft> {
        let close = last.close;
        let mut containing: Vec<&Zone> = view
            .higher
            .iter()
            .flat_map(|h| {
                h.zones.zones().filter(move |z| {
                    matches!(z.kind, ZoneKind::OrderBlock | ZoneKind::Fvg) && z.is_active() && z.contains(close)
                })
            })
            .collect();
        // Newest first; the stable sort keeps HTF priority on ties.
        containing.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let since = Self::since(last, self.config.event_lookback_bars);
        for htf_zone in containing {
            let direction = htf_zone.bias;
            let Some(block) = view
                .zones
                .active(ZoneKind::OrderBlock, direction)
                .into_iter()
                .find(|ob| ob.overlaps(htf_zone.low, htf_zone.high))
            else {
                continue;
            };
            let choch = view
                .structure
                .events_since(since)
                .any(|e| e.kind == StructureKind::Choch && e.direction.as_direction() == direction);
            if !choch {
                continue;
            }
            let Some(stop) = self.stop_beyond(view, direction, Self::distal(block, direction), last.close) else {
                continue;
            };
            return Some(Draft {
                option: OptionId::B,
                direction,
                core: vec![
                    ConfirmationTag::PriceInHtfZone,
                    ConfirmationTag::LtfOrderBlock,
                    ConfirmationTag::ChochConfirmed,
                ],
                stop,
                zone_refs: vec![htf_zone.id.clone(), block.id.clone()],
            });
        }
        None
    }

    // ==================== OPTION C ====================

    fn option_c(&self, view: &MarketView, last: &Candle) -> Option<Draft> {
        let mut blocks: Vec<&Zone> = view
            .zones
            .zones()
            .filter(|z| z.kind == ZoneKind::OrderBlock && z.is_active())
            .collect();
        blocks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for block in blocks {
            let direction = block.bias;
            let overlapping = |kind: ZoneKind| {
                view.zones
                    .active(kind, direction)
                    .into_iter()
                    .find(|z| z.overlaps(block.low, block.high))
            };
            let (Some(gap), Some(fib)) = (overlapping(ZoneKind::Fvg), overlapping(ZoneKind::FibLevel)) else {
                continue;
            };
            let Some(stop) = self.stop_beyond(view, direction, Self::distal(block, direction), last.close) else {
                continue;
            };
            return Some(Draft {
                option: OptionId::C,
                direction,
                core: vec![ConfirmationTag::LtfOrderBlock, ConfirmationTag::FvgOverlap, ConfirmationTag::FibAligned],
                stop,
                zone_refs: vec![block.id.clone(), gap.id.clone(), fib.id.clone()],
            });
        }
        None
    }

    // ==================== BONUSES ====================

    fn bonuses(&self, view: &MarketView, last: &Candle, direction: Direction) -> Vec<ConfirmationTag> {
        let mut bonus = Vec::new();

        let htf_aligned = !view.higher.is_empty()
            && view.higher.iter().all(|h| h.structure.trend().direction() == Some(direction));
        let ltf_not_opposed = view.structure.trend().direction() != Some(direction.opposite());
        if htf_aligned && ltf_not_opposed {
            bonus.push(ConfirmationTag::MtfAlignment);
        }
        if view.session.levels().respected(direction, last.close) {
            bonus.push(ConfirmationTag::PriorSessionLevels);
        }
        if self.recent_sweep(view.zones, direction, last).is_some() {
            bonus.push(ConfirmationTag::LiquiditySwept);
        }
        let recent = &view.execution[view.execution.len().saturating_sub(self.config.sweep_lookback_bars.max(1))..];
        if view.session.range_sweep(recent) == Some(direction) {
            bonus.push(ConfirmationTag::SessionRangeSweep);
        }
        if let [.., previous, current] = view.execution {
            if engulfing(previous, current) == Some(direction) {
                bonus.push(ConfirmationTag::CandlePattern);
            }
        }
        bonus
    }

    fn finish(&self, view: &MarketView, last: &Candle, draft: Draft) -> SetupCandidate {
        let bonus = self.bonuses(view, last, draft.direction);
        let scored = score(&draft.core, &bonus, &self.config.confidence);
        let entry = last.close;
        let risk = (entry - draft.stop).abs();
        SetupCandidate {
            option: draft.option,
            symbol: view.symbol.to_string(),
            direction: draft.direction,
            timeframe: last.timeframe,
            time: last.close_time(),
            confirmations: scored.confirmations,
            confidence: scored.confidence,
            entry,
            stop: draft.stop,
            target: entry + draft.direction.sign() * risk * self.config.target_reward_risk,
            zone_refs: draft.zone_refs,
        }
    }
}
