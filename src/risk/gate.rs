// src/risk/gate.rs
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::calendar::Calendar;
use crate::config::{InstrumentSpec, StrategyConfig};
use crate::risk::AccountState;
use crate::setups::SetupCandidate;
use crate::types::SymbolClass;

/// Tolerance for the loss-limit and reward:risk comparisons.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    LowConfirmation,
    RrTooLow,
    DailyLimitBreached,
    WeeklyLimitBreached,
    MaxTradesReached,
    OutsideSession,
    NewsBlackout,
    StopOutOfBounds,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::LowConfirmation => "low-confirmation",
            RejectReason::RrTooLow => "rr-too-low",
            RejectReason::DailyLimitBreached => "daily-limit-breached",
            RejectReason::WeeklyLimitBreached => "weekly-limit-breached",
            RejectReason::MaxTradesReached => "max-trades-reached",
            RejectReason::OutsideSession => "outside-session",
            RejectReason::NewsBlackout => "news-blackout",
            RejectReason::StopOutOfBounds => "stop-out-of-bounds",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An approved candidate with its sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub candidate: SetupCandidate,
    /// Percent of balance put at risk.
    pub risk_percent: f64,
    pub risk_amount: f64,
    /// Lots: `risk_amount / (stop_pips * pip_value)`.
    pub size: f64,
    pub stop_pips: f64,
    pub reward_risk: f64,
    pub instrument: InstrumentSpec,
}

impl TradePlan {
    /// Counter increments for opening this plan. The gate never applies them.
    pub fn apply_to(&self, account: AccountState) -> AccountState {
        account.with_trade_opened()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approve(TradePlan),
    Reject(RejectReason),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approve(_))
    }
}

/// Stateless sizing and portfolio gate.
#[derive(Debug, Clone)]
pub struct RiskGate {
    config: Arc<StrategyConfig>,
}

impl RiskGate {
    pub fn new(config: Arc<StrategyConfig>) -> Self {
        Self { config }
    }

    /// Checks run in a fixed order: calendar, loss limits, trade count,
    /// confirmations, stop distance, reward:risk. The first failure decides.
    pub fn evaluate(&self, candidate: &SetupCandidate, account: &AccountState, calendar: &Calendar) -> RiskDecision {
        let decision = self.decide(candidate, account, calendar);
        match &decision {
            RiskDecision::Approve(plan) => info!(
                "[RiskGate] {} {:?} option {:?} approved: {:.2}% risk, {:.1} pips, size {:.2}",
                candidate.symbol,
                candidate.direction,
                candidate.option,
                plan.risk_percent,
                plan.stop_pips,
                plan.size
            ),
            RiskDecision::Reject(reason) => debug!(
                "[RiskGate] {} {:?} option {:?} rejected: {}",
                candidate.symbol, candidate.direction, candidate.option, reason
            ),
        }
        decision
    }

    fn decide(&self, candidate: &SetupCandidate, account: &AccountState, calendar: &Calendar) -> RiskDecision {
        let config = &self.config;
        let reject = RiskDecision::Reject;

        if calendar.blackout_at(candidate.time).is_some() {
            return reject(RejectReason::NewsBlackout);
        }
        if !calendar.in_session(candidate.time) {
            return reject(RejectReason::OutsideSession);
        }
        if account.daily_loss_pct() + EPSILON >= config.daily_loss_limit {
            return reject(RejectReason::DailyLimitBreached);
        }
        if account.weekly_loss_pct() + EPSILON >= config.weekly_loss_limit {
            return reject(RejectReason::WeeklyLimitBreached);
        }
        if account.trades_today >= config.max_trades_per_day {
            return reject(RejectReason::MaxTradesReached);
        }

        let risk_percent = match candidate.confirmation_count() {
            3 => config.confirmation_to_risk_fraction.full,
            2 => config.confirmation_to_risk_fraction.half,
            _ => return reject(RejectReason::LowConfirmation),
        };

        let instrument = config.instrument(SymbolClass::from_symbol(&candidate.symbol));
        let stop_pips = round_pips(candidate.stop_distance() / instrument.pip_size);
        let bounds = config.stop_pip_bounds;
        if !(stop_pips > 0.0 && stop_pips >= bounds.min && stop_pips <= bounds.max) {
            return reject(RejectReason::StopOutOfBounds);
        }

        let reward_risk = candidate.reward_risk();
        if reward_risk + EPSILON < config.min_reward_risk_ratio {
            return reject(RejectReason::RrTooLow);
        }

        let risk_amount = account.balance * risk_percent / 100.0;
        RiskDecision::Approve(TradePlan {
            candidate: candidate.clone(),
            risk_percent,
            risk_amount,
            size: risk_amount / (stop_pips * instrument.pip_value),
            stop_pips,
            reward_risk,
            instrument,
        })
    }
}

/// Pip counts are compared at micro-pip resolution so that float noise in
/// the price difference cannot push a boundary stop out of bounds.
fn round_pips(pips: f64) -> f64 {
    (pips * 1e6).round() / 1e6
}
