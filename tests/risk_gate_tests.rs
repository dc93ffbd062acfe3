// tests/risk_gate_tests.rs
//
// Risk gate decisions against the account limits and the confirmation table.

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::init_logging;
use std::sync::Arc;

use setup_detector::calendar::{BlackoutWindow, Calendar};
use setup_detector::risk::{AccountState, RejectReason, RiskDecision, RiskGate};
use setup_detector::setups::{score, ConfirmationTag, OptionId, SetupCandidate};
use setup_detector::{Direction, StrategyConfig, Timeframe};

const CORE: [ConfirmationTag; 3] = [
    ConfirmationTag::HtfTrend,
    ConfirmationTag::LiquiditySwept,
    ConfirmationTag::BosAligned,
];

fn decision_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
}

fn candidate(confirmations: usize, entry: f64, stop: f64, target: f64) -> SetupCandidate {
    SetupCandidate {
        option: OptionId::A,
        symbol: "EURUSD".into(),
        direction: if stop < entry { Direction::Long } else { Direction::Short },
        timeframe: Timeframe::M5,
        time: decision_time(),
        confirmations: CORE[..confirmations].iter().copied().collect(),
        confidence: 0.8,
        entry,
        stop,
        target,
        zone_refs: Vec::new(),
    }
}

fn setup() -> (RiskGate, Calendar) {
    init_logging();
    let config = StrategyConfig::default();
    let calendar = Calendar::from_config(&config);
    (RiskGate::new(Arc::new(config)), calendar)
}

fn rejection(decision: RiskDecision) -> Option<RejectReason> {
    match decision {
        RiskDecision::Reject(reason) => Some(reason),
        RiskDecision::Approve(_) => None,
    }
}

#[test]
fn confirmation_count_maps_to_risk_fraction() {
    let (gate, calendar) = setup();
    let account = AccountState::new(10_000.0);

    for count in 0..=1 {
        let decision = gate.evaluate(&candidate(count, 1.1000, 1.0950, 1.1150), &account, &calendar);
        assert_eq!(rejection(decision), Some(RejectReason::LowConfirmation));
    }

    let RiskDecision::Approve(half) = gate.evaluate(&candidate(2, 1.1000, 1.0950, 1.1150), &account, &calendar)
    else {
        panic!("two confirmations should be approved");
    };
    assert!((half.risk_percent - 0.5).abs() < 1e-12);
    assert!((half.risk_amount - 50.0).abs() < 1e-9);
    assert!((half.size - 0.1).abs() < 1e-9);

    let RiskDecision::Approve(full) = gate.evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar)
    else {
        panic!("three confirmations should be approved");
    };
    assert!((full.risk_percent - 1.0).abs() < 1e-12);
    assert!((full.stop_pips - 50.0).abs() < 1e-9);
    assert!((full.size - 0.2).abs() < 1e-9);
    assert!((full.reward_risk - 3.0).abs() < 1e-6);
}

#[test]
fn daily_loss_at_limit_blocks_new_trades() {
    let (gate, calendar) = setup();
    let mut account = AccountState::new(10_000.0);
    account.daily_pnl = -150.0;
    account.weekly_pnl = -150.0;

    let decision = gate.evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar);
    assert_eq!(rejection(decision), Some(RejectReason::DailyLimitBreached));

    // Just inside the limit is still tradable.
    account.daily_pnl = -149.0;
    account.weekly_pnl = -149.0;
    assert!(gate
        .evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar)
        .is_approved());
}

#[test]
fn weekly_loss_limit_checked_after_daily() {
    let (gate, calendar) = setup();
    let mut account = AccountState::new(10_000.0);
    account.weekly_pnl = -300.0;
    let decision = gate.evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar);
    assert_eq!(rejection(decision), Some(RejectReason::WeeklyLimitBreached));

    account.daily_pnl = -200.0;
    let decision = gate.evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar);
    assert_eq!(rejection(decision), Some(RejectReason::DailyLimitBreached));
}

#[test]
fn loss_limits_use_the_balance_the_period_started_with() {
    let (gate, calendar) = setup();
    let mut account = AccountState::new(9_700.0);
    account.week_start_balance = 10_000.0;
    account.daily_pnl = -145.5;
    account.weekly_pnl = -145.5;
    assert!((account.daily_loss_pct() - 1.5).abs() < 1e-9);

    let decision = gate.evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar);
    assert_eq!(rejection(decision), Some(RejectReason::DailyLimitBreached));

    // 145 of 9,700 is 1.49%, still inside the limit.
    account.daily_pnl = -145.0;
    account.weekly_pnl = -145.0;
    assert!(account.daily_loss_pct() < 1.5);
    assert!(gate
        .evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar)
        .is_approved());
}

#[test]
fn limits_are_checked_before_confirmations() {
    let (gate, calendar) = setup();
    let mut account = AccountState::new(10_000.0);
    account.trades_today = 2;
    let decision = gate.evaluate(&candidate(1, 1.1000, 1.0950, 1.1150), &account, &calendar);
    assert_eq!(rejection(decision), Some(RejectReason::MaxTradesReached));
}

#[test]
fn stop_distance_bounds_are_inclusive() {
    let (gate, calendar) = setup();
    let account = AccountState::new(10_000.0);

    let at_max = gate.evaluate(&candidate(3, 1.1000, 1.0850, 1.1300), &account, &calendar);
    let RiskDecision::Approve(plan) = at_max else {
        panic!("150 pip stop should be accepted");
    };
    assert!((plan.stop_pips - 150.0).abs() < 1e-9);

    let beyond = gate.evaluate(&candidate(3, 1.1000, 1.084999, 1.1300), &account, &calendar);
    assert_eq!(rejection(beyond), Some(RejectReason::StopOutOfBounds));

    let at_min = gate.evaluate(&candidate(3, 1.1000, 1.0970, 1.1090), &account, &calendar);
    assert!(at_min.is_approved());

    let tight = gate.evaluate(&candidate(3, 1.1000, 1.0975, 1.1090), &account, &calendar);
    assert_eq!(rejection(tight), Some(RejectReason::StopOutOfBounds));
}

#[test]
fn reward_risk_below_minimum_is_rejected() {
    let (gate, calendar) = setup();
    let account = AccountState::new(10_000.0);
    // Short: 50 pip stop, 90 pip target.
    let decision = gate.evaluate(&candidate(3, 1.1000, 1.1050, 1.0910), &account, &calendar);
    assert_eq!(rejection(decision), Some(RejectReason::RrTooLow));
    // Exactly 2:1 passes.
    let decision = gate.evaluate(&candidate(3, 1.1000, 1.1050, 1.0900), &account, &calendar);
    assert!(decision.is_approved());
}

#[test]
fn calendar_rejections_come_first() {
    init_logging();
    let config = StrategyConfig::default();
    let gate = RiskGate::new(Arc::new(config.clone()));
    let blackout = BlackoutWindow {
        label: "NFP".into(),
        start: decision_time() - Duration::minutes(15),
        end: decision_time() + Duration::minutes(15),
    };
    let calendar = Calendar::new(config.session_windows.clone(), vec![blackout]);
    let mut account = AccountState::new(10_000.0);
    account.daily_pnl = -500.0;

    let decision = gate.evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar);
    assert_eq!(rejection(decision), Some(RejectReason::NewsBlackout));

    let mut late = candidate(3, 1.1000, 1.0950, 1.1150);
    late.time = Utc.with_ymd_and_hms(2024, 3, 5, 23, 0, 0).unwrap();
    let decision = gate.evaluate(&late, &account, &Calendar::from_config(&config));
    assert_eq!(rejection(decision), Some(RejectReason::OutsideSession));
}

#[test]
fn gate_never_mutates_the_account() {
    let (gate, calendar) = setup();
    let account = AccountState::new(10_000.0);
    let before = account;
    let decision = gate.evaluate(&candidate(3, 1.1000, 1.0950, 1.1150), &account, &calendar);
    assert_eq!(account, before);

    let RiskDecision::Approve(plan) = decision else {
        panic!("expected approval");
    };
    let after = plan.apply_to(account);
    assert_eq!(after.trades_today, 1);
    assert_eq!(after.open_positions, 1);
}

#[test]
fn adding_bonus_confirmations_never_lowers_score() {
    let weights = StrategyConfig::default().confidence;
    let bonuses = [
        ConfirmationTag::CandlePattern,
        ConfirmationTag::MtfAlignment,
        ConfirmationTag::SessionRangeSweep,
        ConfirmationTag::PriorSessionLevels,
    ];
    for core_len in 0..=CORE.len() {
        let mut previous = score(&CORE[..core_len], &[], &weights);
        for n in 1..=bonuses.len() {
            let next = score(&CORE[..core_len], &bonuses[..n], &weights);
            assert!(next.confirmations.len() >= previous.confirmations.len());
            assert!(next.confidence >= previous.confidence);
            assert!(next.confidence >= weights.min && next.confidence <= weights.max);
            previous = next;
        }
    }
}
