use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::template::InputValue;

/// A cron-based scheduled agent trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub cron_expr: String,
    pub agent_id: String,
    pub workspace_id: String,
    /// Explicit prompt; when absent the agent's first step template is filled
    /// with `input_values`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub input_values: HashMap<String, InputValue>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleInput {
    pub name: String,
    pub cron_expr: String,
    pub agent_id: String,
    #[serde(default = "default_workspace")]
    pub workspace_id: String,
    pub prompt: Option<String>,
    #[serde(default)]
    pub input_values: HashMap<String, InputValue>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_workspace() -> String {
    "default".to_string()
}

/// Partial update input for PATCH.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleInput {
    pub name: Option<String>,
    pub cron_expr: Option<String>,
    pub agent_id: Option<String>,
    pub prompt: Option<String>,
    pub input_values: Option<HashMap<String, InputValue>>,
    pub enabled: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<String>,
}

/// Next fire time strictly after `after`.
///
/// Accepts classic 5-field expressions (`min hour dom month dow`) as well as
/// the 6/7-field form with seconds understood by the `cron` crate.
pub fn next_run_after(cron_expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let fields = cron_expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", cron_expr.trim())
    } else {
        cron_expr.trim().to_string()
    };

    let schedule = cron::Schedule::from_str(&normalized)
        .map_err(|e| CoreError::BadRequest(format!("Invalid cron expression '{}': {}", cron_expr, e)))?;

    schedule
        .after(&after)
        .next()
        .ok_or_else(|| CoreError::BadRequest(format!("Cron expression '{}' never fires", cron_expr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_expression() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        let next = next_run_after("30 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_six_field_expression() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        let next = next_run_after("0 0 12 * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let err = next_run_after("every tuesday", Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)));
    }
}
