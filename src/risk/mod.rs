// src/risk/mod.rs
pub mod account;
pub mod gate;

pub use account::AccountState;
pub use gate::{RejectReason, RiskDecision, RiskGate, TradePlan};
