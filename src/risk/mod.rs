//! Risk controls for the rebalancer.
//!
//! - Hard stop against a fixed reference equity
//! - Last-line order validation before submission
//! - Structured alerts for workflow parsing

mod alert;
mod gate;

pub use alert::{RiskAlert, RiskAlertType};
pub use gate::RiskGate;
