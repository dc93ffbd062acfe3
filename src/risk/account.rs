// src/risk/account.rs
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Balance and counters for one account. Every change returns a new value;
/// the risk gate only ever reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub daily_pnl: f64,
    pub weekly_pnl: f64,
    pub trades_today: u32,
    pub open_positions: u32,
    /// Balance when the current day / ISO week started; loss limits are
    /// percentages of these.
    pub day_start_balance: f64,
    pub week_start_balance: f64,
    pub current_day: Option<NaiveDate>,
    pub current_week: Option<(i32, u32)>,
}

impl AccountState {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            equity: balance,
            daily_pnl: 0.0,
            weekly_pnl: 0.0,
            trades_today: 0,
            open_positions: 0,
            day_start_balance: balance,
            week_start_balance: balance,
            current_day: None,
            current_week: None,
        }
    }

    /// Resets the daily counters on a new UTC date and the weekly P&L on a new
    /// ISO week.
    pub fn roll_to(self, at: DateTime<Utc>) -> Self {
        let mut next = self;
        let day = at.date_naive();
        let iso = day.iso_week();
        let week = (iso.year(), iso.week());

        if next.current_day != Some(day) {
            if next.current_day.is_some() {
                next.daily_pnl = 0.0;
                next.trades_today = 0;
                next.day_start_balance = next.balance;
            }
            next.current_day = Some(day);
        }
        if next.current_week != Some(week) {
            if next.current_week.is_some() {
                next.weekly_pnl = 0.0;
                next.week_start_balance = next.balance;
            }
            next.current_week = Some(week);
        }
        next
    }

    pub fn with_trade_opened(self) -> Self {
        Self {
            trades_today: self.trades_today + 1,
            open_positions: self.open_positions + 1,
            ..self
        }
    }

    pub fn with_trade_closed(self, pnl: f64) -> Self {
        let balance = self.balance + pnl;
        Self {
            balance,
            equity: balance,
            daily_pnl: self.daily_pnl + pnl,
            weekly_pnl: self.weekly_pnl + pnl,
            open_positions: self.open_positions.saturating_sub(1),
            ..self
        }
    }

    pub fn with_unrealized(self, unrealized: f64) -> Self {
        Self {
            equity: self.balance + unrealized,
            ..self
        }
    }

    pub fn daily_loss_pct(&self) -> f64 {
        pct_of(self.daily_pnl, self.day_start_balance)
    }

    pub fn weekly_loss_pct(&self) -> f64 {
        pct_of(self.weekly_pnl, self.week_start_balance)
    }
}

fn pct_of(pnl: f64, base: f64) -> f64 {
    if base > 0.0 {
        -pnl / base * 100.0
    } else {
        0.0
    }
}
