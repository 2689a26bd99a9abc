//! Shared data model for flag evaluation, request metrics, and rollback
//! plumbing. Everything here crosses at least one crate boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attributes of the caller a flag decision is made against. Populated by
/// the routing layer from request headers; every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalContext {
    pub user_id: Option<String>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl EvalContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Identity string used for bucketing. Unauthenticated callers all
    /// collapse into the literal `anonymous` identity, which means they share
    /// a single bucket per flag. Intentional: one stable experience for
    /// anonymous traffic rather than a per-request coin flip.
    pub fn bucketing_identity(&self) -> &str {
        self.user_id.as_deref().unwrap_or("anonymous")
    }
}

/// Comparison operator used inside flag conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    NotEq,
    In,
    NotIn,
    Contains,
}

impl ConditionOp {
    fn apply(&self, actual: &str, expected: &[String]) -> bool {
        match self {
            Self::Eq => expected.first().is_some_and(|e| e == actual),
            Self::NotEq => expected.first().is_some_and(|e| e != actual),
            Self::In => expected.iter().any(|e| e == actual),
            Self::NotIn => !expected.iter().any(|e| e == actual),
            Self::Contains => expected.first().is_some_and(|e| actual.contains(e.as_str())),
        }
    }
}

/// A single targeting condition on a feature flag. All conditions on a flag
/// are AND-combined before percentage bucketing runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlagCondition {
    Country { op: ConditionOp, values: Vec<String> },
    UserAgentContains { needle: String },
    Custom { key: String, op: ConditionOp, value: String },
}

impl FlagCondition {
    /// Evaluate against a request context. A missing required attribute
    /// fails the condition regardless of operator.
    pub fn matches(&self, ctx: &EvalContext) -> bool {
        match self {
            Self::Country { op, values } => match ctx.country.as_deref() {
                Some(country) => op.apply(country, values),
                None => false,
            },
            Self::UserAgentContains { needle } => match ctx.user_agent.as_deref() {
                Some(ua) => ua.contains(needle.as_str()),
                None => false,
            },
            Self::Custom { key, op, value } => match ctx.attributes.get(key) {
                Some(actual) => op.apply(actual, std::slice::from_ref(value)),
                None => false,
            },
        }
    }
}

/// Severity attached to alerts, triggers, and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

/// Delivery channel for operational notifications. Concrete delivery is the
/// responsibility of an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Webhook,
    Slack,
}

/// Client-reported web-vitals measurements attached to a request sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebVitals {
    pub largest_paint_ms: Option<f64>,
    pub input_delay_ms: Option<f64>,
    pub layout_shift: Option<f64>,
}

/// Web-vital dimension referenced by rollback trigger conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebVital {
    LargestPaint,
    InputDelay,
    LayoutShift,
}

/// One observed request, as fed into the metrics aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub route: String,
    pub method: String,
    pub duration_ms: u64,
    pub status_code: u16,
    pub web_vitals: Option<WebVitals>,
}

impl MetricSample {
    pub fn is_error(&self) -> bool {
        self.status_code >= 500
    }
}

/// Averages over the web-vitals fields present in a window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WebVitalsAvg {
    pub largest_paint_ms: f64,
    pub input_delay_ms: f64,
    pub layout_shift: f64,
    pub sample_count: usize,
}

impl WebVitalsAvg {
    pub fn value(&self, vital: WebVital) -> f64 {
        match vital {
            WebVital::LargestPaint => self.largest_paint_ms,
            WebVital::InputDelay => self.input_delay_ms,
            WebVital::LayoutShift => self.layout_shift,
        }
    }
}

/// Rolling statistics over the sample window. Zeroed when the window holds
/// no samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStats {
    pub request_count: usize,
    pub error_count: usize,
    pub error_rate_pct: f64,
    pub avg_duration_ms: f64,
    pub slow_count: usize,
    pub vitals: WebVitalsAvg,
    pub window_minutes: i64,
    pub computed_at: DateTime<Utc>,
}

impl WindowStats {
    pub fn empty(window_minutes: i64) -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            error_rate_pct: 0.0,
            avg_duration_ms: 0.0,
            slow_count: 0,
            vitals: WebVitalsAvg::default(),
            window_minutes,
            computed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvalContext {
        EvalContext {
            user_id: Some("user-1".into()),
            country: Some("DE".into()),
            user_agent: Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)".into()),
            attributes: HashMap::from([("plan".to_string(), "premium".to_string())]),
        }
    }

    #[test]
    fn test_country_condition() {
        let cond = FlagCondition::Country {
            op: ConditionOp::In,
            values: vec!["DE".into(), "AT".into()],
        };
        assert!(cond.matches(&ctx()));

        let cond = FlagCondition::Country {
            op: ConditionOp::NotIn,
            values: vec!["US".into()],
        };
        assert!(cond.matches(&ctx()));
    }

    #[test]
    fn test_missing_attribute_fails_condition() {
        let cond = FlagCondition::Country {
            op: ConditionOp::NotEq,
            values: vec!["US".into()],
        };
        // NotEq would match any country, but an absent attribute always fails
        let anonymous = EvalContext::default();
        assert!(!cond.matches(&anonymous));
    }

    #[test]
    fn test_user_agent_condition() {
        let cond = FlagCondition::UserAgentContains {
            needle: "iPhone".into(),
        };
        assert!(cond.matches(&ctx()));
        assert!(!cond.matches(&EvalContext::for_user("user-2")));
    }

    #[test]
    fn test_custom_attribute_condition() {
        let cond = FlagCondition::Custom {
            key: "plan".into(),
            op: ConditionOp::Eq,
            value: "premium".into(),
        };
        assert!(cond.matches(&ctx()));

        let cond = FlagCondition::Custom {
            key: "plan".into(),
            op: ConditionOp::Eq,
            value: "free".into(),
        };
        assert!(!cond.matches(&ctx()));
    }

    #[test]
    fn test_anonymous_identity_collapses() {
        let a = EvalContext::default();
        let b = EvalContext::default();
        assert_eq!(a.bucketing_identity(), "anonymous");
        assert_eq!(a.bucketing_identity(), b.bucketing_identity());
    }

    #[test]
    fn test_error_classification() {
        let mut sample = MetricSample {
            timestamp: Utc::now(),
            route: "/api/bookings".into(),
            method: "POST".into(),
            duration_ms: 120,
            status_code: 200,
            web_vitals: None,
        };
        assert!(!sample.is_error());
        sample.status_code = 404;
        assert!(!sample.is_error());
        sample.status_code = 503;
        assert!(sample.is_error());
    }
}
