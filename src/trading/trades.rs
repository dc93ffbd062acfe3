// src/trading/trades.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::InstrumentSpec;
use crate::errors::CoreError;
use crate::risk::TradePlan;
use crate::setups::{OptionId, SetupCandidate};
use crate::types::Direction;

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Open,
    ClosedWin,
    ClosedLoss,
    ClosedBreakeven,
}

impl TradeStatus {
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TradeStatus::ClosedWin | TradeStatus::ClosedLoss | TradeStatus::ClosedBreakeven
        )
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    /// Stop hit after it was moved to entry.
    Breakeven,
    EndOfData,
}

/// First 16 hex chars of SHA-256 over the fields that identify a setup.
pub fn generate_deterministic_trade_id(
    symbol: &str,
    time: DateTime<Utc>,
    option: OptionId,
    direction: Direction,
) -> String {
    let id_input = format!("{}_{}_{:?}_{:?}", symbol.to_uppercase(), time.to_rfc3339(), option, direction);
    let mut hasher = Sha256::new();
    hasher.update(id_input.as_bytes());
    let hex_id = format!("{:x}", hasher.finalize());
    hex_id[..16].to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub option: OptionId,
    pub direction: Direction,
    /// Decision time of the setup.
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub fill_time: Option<DateTime<Utc>>,
    pub stop_loss: f64,
    pub initial_stop_loss: f64,
    pub take_profit: f64,
    pub lot_size: f64,
    pub risk_percent: f64,
    pub risk_amount: f64,
    pub instrument: InstrumentSpec,
    pub breakeven_applied: bool,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub profit_loss: Option<f64>,
    pub profit_loss_pips: Option<f64>,
    status: TradeStatus,
    setup: SetupCandidate,
}

impl Trade {
    /// A PENDING trade from an approved plan. The id is a pure function of the
    /// setup so replays produce the same ids.
    pub fn from_plan(plan: &TradePlan) -> Self {
        let setup = &plan.candidate;
        let id = generate_deterministic_trade_id(&setup.symbol, setup.time, setup.option, setup.direction);

        Self {
            id,
            symbol: setup.symbol.clone(),
            option: setup.option,
            direction: setup.direction,
            entry_time: setup.time,
            entry_price: setup.entry,
            fill_time: None,
            stop_loss: setup.stop,
            initial_stop_loss: setup.stop,
            take_profit: setup.target,
            lot_size: plan.size,
            risk_percent: plan.risk_percent,
            risk_amount: plan.risk_amount,
            instrument: plan.instrument,
            breakeven_applied: false,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            profit_loss: None,
            profit_loss_pips: None,
            status: TradeStatus::Pending,
            setup: setup.clone(),
        }
    }

    pub fn status(&self) -> TradeStatus {
        self.status
    }

    /// The setup snapshot this trade was opened from.
    pub fn setup(&self) -> &SetupCandidate {
        &self.setup
    }

    fn transition_error(&self, to: TradeStatus) -> CoreError {
        CoreError::InvalidTradeTransition {
            trade_id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    pub fn fill(&mut self, time: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != TradeStatus::Pending {
            return Err(self.transition_error(TradeStatus::Open));
        }
        self.status = TradeStatus::Open;
        self.fill_time = Some(time);
        Ok(())
    }

    pub fn pips_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign() / self.instrument.pip_size
    }

    pub fn pnl_at(&self, price: f64) -> f64 {
        self.pips_at(price) * self.instrument.pip_value * self.lot_size
    }

    /// Moves the stop to entry. Only an open trade can do this, and only once.
    pub fn move_stop_to_entry(&mut self) -> Result<f64, CoreError> {
        if self.status != TradeStatus::Open || self.breakeven_applied {
            return Err(self.transition_error(self.status));
        }
        let previous = self.stop_loss;
        self.stop_loss = self.entry_price;
        self.breakeven_applied = true;
        Ok(previous)
    }

    /// Closes an open trade at `price`. The final status follows the sign of
    /// the realized P&L in pips; an exit exactly at entry is breakeven.
    pub fn close(&mut self, time: DateTime<Utc>, price: f64, reason: ExitReason) -> Result<(), CoreError> {
        let pips = self.pips_at(price);
        let status = if pips.abs() < 1e-6 {
            TradeStatus::ClosedBreakeven
        } else if pips > 0.0 {
            TradeStatus::ClosedWin
        } else {
            TradeStatus::ClosedLoss
        };
        if self.status != TradeStatus::Open {
            return Err(self.transition_error(status));
        }

        self.status = status;
        self.exit_time = Some(time);
        self.exit_price = Some(price);
        self.exit_reason = Some(reason);
        self.profit_loss_pips = Some(pips);
        self.profit_loss = Some(if status == TradeStatus::ClosedBreakeven {
            0.0
        } else {
            self.pnl_at(price)
        });
        Ok(())
    }
}

// ==================== EVENTS ====================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradeEventKind {
    Opened {
        option: OptionId,
        direction: Direction,
        entry: f64,
        stop: f64,
        target: f64,
        size: f64,
        risk_percent: f64,
    },
    Filled {
        price: f64,
    },
    StopAdjusted {
        from: f64,
        to: f64,
    },
    Closed {
        status: TradeStatus,
        reason: ExitReason,
        price: f64,
        profit_loss: f64,
    },
}

/// One entry of the append-only trade journal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TradeEvent {
    pub trade_id: String,
    pub symbol: String,
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TradeEventKind,
}

// ==================== SUMMARY ====================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TradeSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    pub total_profit_loss: f64,
    pub win_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_return_pct: f64,
}

impl TradeSummary {
    /// Statistics over the closed trades in ledger order. Drawdown is measured
    /// on the balance curve starting at `initial_balance`.
    pub fn from_trades(trades: &[Trade], initial_balance: f64) -> Self {
        let closed_trades: Vec<&Trade> = trades.iter().filter(|t| t.status.is_closed()).collect();
        let pnl = |t: &Trade| t.profit_loss.unwrap_or(0.0);

        let total_trades = closed_trades.len();
        let winning_trades = closed_trades
            .iter()
            .filter(|t| t.status == TradeStatus::ClosedWin)
            .count();
        let losing_trades = closed_trades
            .iter()
            .filter(|t| t.status == TradeStatus::ClosedLoss)
            .count();
        let breakeven_trades = total_trades - winning_trades - losing_trades;

        let total_profit_loss: f64 = closed_trades.iter().map(|t| pnl(t)).sum();

        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let total_wins: f64 = closed_trades
            .iter()
            .filter(|t| t.status == TradeStatus::ClosedWin)
            .map(|t| pnl(t))
            .sum();

        let total_losses: f64 = closed_trades
            .iter()
            .filter(|t| t.status == TradeStatus::ClosedLoss)
            .map(|t| pnl(t).abs())
            .sum();

        let average_win = if winning_trades > 0 {
            total_wins / winning_trades as f64
        } else {
            0.0
        };

        let average_loss = if losing_trades > 0 {
            total_losses / losing_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut max_drawdown = 0.0;
        let mut max_drawdown_pct = 0.0;
        let mut peak = initial_balance;
        let mut balance = initial_balance;

        for trade in &closed_trades {
            balance += pnl(trade);
            if balance > peak {
                peak = balance;
            }
            let drawdown = peak - balance;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
            if peak > 0.0 && drawdown / peak * 100.0 > max_drawdown_pct {
                max_drawdown_pct = drawdown / peak * 100.0;
            }
        }

        let total_return_pct = if initial_balance > 0.0 {
            total_profit_loss / initial_balance * 100.0
        } else {
            0.0
        };

        TradeSummary {
            total_trades,
            winning_trades,
            losing_trades,
            breakeven_trades,
            total_profit_loss,
            win_rate,
            average_win,
            average_loss,
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            initial_balance,
            final_balance: initial_balance + total_profit_loss,
            total_return_pct,
        }
    }
}
