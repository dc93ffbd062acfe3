// src/trading/lifecycle.rs
// PENDING -> OPEN -> CLOSED_{WIN,LOSS,BREAKEVEN}. Open trades are checked
// against each execution candle after their fill; when one candle reaches both
// the stop and the target, the stop is taken.

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::errors::CoreError;
use crate::risk::TradePlan;
use crate::trading::trade_event_logger::{NullSink, TradeSink};
use crate::trading::trades::{ExitReason, Trade, TradeEvent, TradeEventKind};
use crate::types::{Candle, Direction};

pub struct TradeLifecycleManager {
    symbol: String,
    breakeven_trigger: f64,
    open: Vec<Trade>,
    closed: Vec<Trade>,
    events: Vec<TradeEvent>,
    sink: Box<dyn TradeSink>,
}

impl TradeLifecycleManager {
    pub fn new(symbol: &str, breakeven_trigger: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            breakeven_trigger,
            open: Vec::new(),
            closed: Vec::new(),
            events: Vec::new(),
            sink: Box::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn TradeSink>) -> Self {
        self.sink = sink;
        self
    }

    fn record(&mut self, trade_id: &str, time: DateTime<Utc>, kind: TradeEventKind) {
        self.events.push(TradeEvent {
            trade_id: trade_id.to_string(),
            symbol: self.symbol.clone(),
            time,
            kind,
        });
    }

    /// Registers a PENDING trade for an approved plan and returns its id.
    pub fn open(&mut self, plan: &TradePlan) -> String {
        let trade = Trade::from_plan(plan);
        let id = trade.id.clone();
        self.record(
            &id,
            trade.entry_time,
            TradeEventKind::Opened {
                option: trade.option,
                direction: trade.direction,
                entry: trade.entry_price,
                stop: trade.stop_loss,
                target: trade.take_profit,
                size: trade.lot_size,
                risk_percent: trade.risk_percent,
            },
        );
        self.open.push(trade);
        id
    }

    /// PENDING -> OPEN at the trade's entry price.
    pub fn fill(&mut self, trade_id: &str, time: DateTime<Utc>) -> Result<&Trade, CoreError> {
        let index = self
            .open
            .iter()
            .position(|t| t.id == trade_id)
            .ok_or_else(|| CoreError::UnknownTrade(trade_id.to_string()))?;
        self.open[index].fill(time)?;
        let price = self.open[index].entry_price;
        self.record(trade_id, time, TradeEventKind::Filled { price });

        let trade = &self.open[index];
        info!(
            "[Lifecycle] {} {:?} opened at {:.5} (stop {:.5}, target {:.5}, size {:.2})",
            trade.id, trade.direction, trade.entry_price, trade.stop_loss, trade.take_profit, trade.lot_size
        );
        self.sink.on_open(trade);
        Ok(trade)
    }

    /// Applies one execution candle to every OPEN trade filled before it.
    /// Returns the trades this candle closed.
    pub fn on_bar(&mut self, candle: &Candle) -> Result<Vec<Trade>, CoreError> {
        let at = candle.close_time();
        let mut closed_now = Vec::new();
        let mut index = 0;

        while index < self.open.len() {
            let trade = &mut self.open[index];
            let monitored = trade.fill_time.map_or(false, |filled| candle.timestamp >= filled);
            if !monitored {
                index += 1;
                continue;
            }

            let (stop_hit, target_hit, favorable) = match trade.direction {
                Direction::Long => (
                    candle.low <= trade.stop_loss,
                    candle.high >= trade.take_profit,
                    candle.high - trade.entry_price,
                ),
                Direction::Short => (
                    candle.high >= trade.stop_loss,
                    candle.low <= trade.take_profit,
                    trade.entry_price - candle.low,
                ),
            };

            let exit = if stop_hit {
                let reason = if trade.breakeven_applied {
                    ExitReason::Breakeven
                } else {
                    ExitReason::StopLoss
                };
                Some((trade.stop_loss, reason))
            } else if target_hit {
                Some((trade.take_profit, ExitReason::TakeProfit))
            } else {
                None
            };

            if let Some((price, reason)) = exit {
                trade.close(at, price, reason)?;
                let trade = self.open.remove(index);
                self.finish(trade.clone());
                closed_now.push(trade);
                continue;
            }

            let trigger_distance = self.breakeven_trigger * (trade.take_profit - trade.entry_price).abs();
            if !trade.breakeven_applied && favorable >= trigger_distance {
                let previous = trade.move_stop_to_entry()?;
                debug!("[Lifecycle] {} stop moved to entry {:.5}", trade.id, trade.stop_loss);
                self.events.push(TradeEvent {
                    trade_id: trade.id.clone(),
                    symbol: self.symbol.clone(),
                    time: at,
                    kind: TradeEventKind::StopAdjusted {
                        from: previous,
                        to: trade.stop_loss,
                    },
                });
                self.sink.on_stop_adjusted(trade, previous, at);
            }
            index += 1;
        }
        Ok(closed_now)
    }

    /// Closes every OPEN trade at `price`. Used when a backtest is configured
    /// to flatten at the end of data.
    pub fn close_all(&mut self, price: f64, at: DateTime<Utc>) -> Result<Vec<Trade>, CoreError> {
        let mut closed_now = Vec::new();
        let mut remaining = Vec::new();
        for mut trade in std::mem::take(&mut self.open) {
            if trade.fill_time.is_none() {
                remaining.push(trade);
                continue;
            }
            trade.close(at, price, ExitReason::EndOfData)?;
            self.finish(trade.clone());
            closed_now.push(trade);
        }
        self.open = remaining;
        Ok(closed_now)
    }

    fn finish(&mut self, trade: Trade) {
        let (price, profit_loss) = (trade.exit_price.unwrap_or(trade.entry_price), trade.profit_loss.unwrap_or(0.0));
        let time = trade.exit_time.unwrap_or(trade.entry_time);
        info!(
            "[Lifecycle] {} closed {:?} at {:.5}: {:.2}",
            trade.id,
            trade.status(),
            price,
            profit_loss
        );
        self.record(
            &trade.id,
            time,
            TradeEventKind::Closed {
                status: trade.status(),
                reason: trade.exit_reason.unwrap_or(ExitReason::EndOfData),
                price,
                profit_loss,
            },
        );
        self.sink.on_close(&trade);
        self.closed.push(trade);
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.open
            .iter()
            .filter(|t| t.fill_time.is_some())
            .map(|t| t.pnl_at(price))
            .sum()
    }

    pub fn open_trades(&self) -> &[Trade] {
        &self.open
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed
    }

    pub fn events(&self) -> &[TradeEvent] {
        &self.events
    }
}
