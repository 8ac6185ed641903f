//! Structured risk alerts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::error;

/// Types of risk alerts.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum RiskAlertType {
    /// Equity fell below the hard-stop floor; trading skipped this cycle
    HardStop {
        equity: Decimal,
        stop_loss_equity: Decimal,
    },
    /// Hard stop held for too many consecutive cycles
    HardStopEscalation { consecutive: u32, limit: u32 },
}

/// A risk alert, logged as one JSON line under the `risk_alert` target.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub alert_type: RiskAlertType,
    pub message: String,
    pub metrics: HashMap<String, Decimal>,
    pub suggested_action: String,
}

impl RiskAlert {
    pub fn new(
        alert_type: RiskAlertType,
        message: impl Into<String>,
        suggested_action: impl Into<String>,
    ) -> Self {
        let timestamp = Utc::now();
        let alert_id = format!(
            "risk-{}-{}",
            timestamp.timestamp(),
            timestamp.timestamp_subsec_nanos()
        );

        Self {
            alert_id,
            timestamp,
            alert_type,
            message: message.into(),
            metrics: HashMap::new(),
            suggested_action: suggested_action.into(),
        }
    }

    /// Add a metric to the alert.
    pub fn with_metric(mut self, key: &str, value: Decimal) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    /// Emit as structured log for workflow parsing.
    ///
    /// All alert types are logged at error level.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        error!(target: "risk_alert", severity = "CRITICAL", "RISK_ALERT: {}", json);
    }
}
