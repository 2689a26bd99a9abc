//! Alert rules evaluated on a fixed tick against the rolling sample window.
//! Matched rules dispatch their actions in declared order; anything that
//! leaves the process (notifications) is fired without blocking the tick and
//! runs under a bounded timeout.

use crate::aggregator::MetricsAggregator;
use crate::notify::Notifier;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use guard_core::types::{NotificationChannel, Severity, WindowStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

/// Stat field an alert rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    ErrorRatePct,
    AvgDurationMs,
    SlowCount,
    RequestCount,
    LargestPaintMs,
    InputDelayMs,
    LayoutShift,
}

impl MetricField {
    pub fn read(&self, stats: &WindowStats) -> f64 {
        match self {
            Self::ErrorRatePct => stats.error_rate_pct,
            Self::AvgDurationMs => stats.avg_duration_ms,
            Self::SlowCount => stats.slow_count as f64,
            Self::RequestCount => stats.request_count as f64,
            Self::LargestPaintMs => stats.vitals.largest_paint_ms,
            Self::InputDelayMs => stats.vitals.input_delay_ms,
            Self::LayoutShift => stats.vitals.layout_shift,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
        }
    }
}

/// One step of a matched rule's response, executed in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    Log,
    Notify { channel: NotificationChannel },
    /// Hand the named trigger to the rollback controller. The controller
    /// owns cooldown and event bookkeeping; this only signals.
    RollbackSignal { trigger: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub metric: MetricField,
    pub comparison: Comparison,
    pub threshold: f64,
    pub window_minutes: i64,
    pub severity: Severity,
    pub actions: Vec<AlertAction>,
}

/// Record of a rule that matched on some tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredAlert {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_name: String,
    pub metric: MetricField,
    pub observed: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub fired_at: DateTime<Utc>,
    /// Trigger names this alert asked the rollback controller to run.
    pub rollback_signals: Vec<String>,
}

pub struct AlertEngine {
    rules: DashMap<Uuid, AlertRule>,
    history: DashMap<Uuid, FiredAlert>,
    notifier: Arc<Notifier>,
    dispatch_timeout: Duration,
}

impl AlertEngine {
    pub fn new(notifier: Arc<Notifier>, dispatch_timeout: Duration) -> Self {
        Self {
            rules: DashMap::new(),
            history: DashMap::new(),
            notifier,
            dispatch_timeout,
        }
    }

    pub fn register_rule(&self, rule: AlertRule) {
        self.rules.insert(rule.id, rule);
    }

    pub fn list_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<_> = self.rules.iter().map(|e| e.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    /// Evaluate every enabled rule against its own window and dispatch the
    /// actions of the ones that match. Returns the fired alerts so the
    /// caller can forward any rollback signals.
    pub fn evaluate_at(&self, aggregator: &MetricsAggregator, now: DateTime<Utc>) -> Vec<FiredAlert> {
        let mut fired = Vec::new();
        for entry in self.rules.iter() {
            let rule = entry.value();
            if !rule.enabled {
                continue;
            }
            let stats = aggregator.compute_stats_at(rule.window_minutes, now);
            let observed = rule.metric.read(&stats);
            if !rule.comparison.apply(observed, rule.threshold) {
                continue;
            }

            let mut alert = FiredAlert {
                id: Uuid::new_v4(),
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                metric: rule.metric,
                observed,
                threshold: rule.threshold,
                severity: rule.severity,
                fired_at: now,
                rollback_signals: Vec::new(),
            };
            self.dispatch_actions(rule, &mut alert);
            self.history.insert(alert.id, alert.clone());
            fired.push(alert);
        }
        fired
    }

    /// Walk the rule's actions in order. Notification sends are spawned so a
    /// slow channel cannot stall the evaluation tick; each send is bounded
    /// by the dispatch timeout and a failure is logged, never propagated.
    fn dispatch_actions(&self, rule: &AlertRule, alert: &mut FiredAlert) {
        for action in &rule.actions {
            match action {
                AlertAction::Log => {
                    warn!(
                        rule = %rule.name,
                        metric = ?rule.metric,
                        observed = alert.observed,
                        threshold = rule.threshold,
                        severity = ?rule.severity,
                        "Alert rule matched"
                    );
                }
                AlertAction::Notify { channel } => {
                    let notifier = self.notifier.clone();
                    let channel = *channel;
                    let severity = rule.severity;
                    let title = format!("Alert: {}", rule.name);
                    let message = format!(
                        "{:?} at {:.2} crossed threshold {:.2}",
                        rule.metric, alert.observed, rule.threshold
                    );
                    let timeout = self.dispatch_timeout;
                    tokio::spawn(async move {
                        match tokio::time::timeout(
                            timeout,
                            notifier.send(channel, severity, title, message),
                        )
                        .await
                        {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => error!(error = %e, "Alert notification failed"),
                            Err(_) => error!(timeout_ms = timeout.as_millis() as u64, "Alert notification timed out"),
                        }
                    });
                }
                AlertAction::RollbackSignal { trigger } => {
                    alert.rollback_signals.push(trigger.clone());
                }
            }
        }
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<FiredAlert> {
        let mut alerts: Vec<_> = self.history.iter().map(|e| e.value().clone()).collect();
        alerts.sort_by(|a, b| b.fired_at.cmp(&a.fired_at));
        alerts.truncate(limit);
        alerts
    }

    /// Baseline rules for the booking platform's request path.
    pub fn seed_default_rules(&self) {
        self.register_rule(AlertRule {
            id: Uuid::new_v4(),
            name: "error-rate-spike".into(),
            enabled: true,
            metric: MetricField::ErrorRatePct,
            comparison: Comparison::Gt,
            threshold: 5.0,
            window_minutes: 5,
            severity: Severity::Critical,
            actions: vec![
                AlertAction::Log,
                AlertAction::Notify {
                    channel: NotificationChannel::Webhook,
                },
                AlertAction::RollbackSignal {
                    trigger: "error-rate-breach".into(),
                },
            ],
        });
        self.register_rule(AlertRule {
            id: Uuid::new_v4(),
            name: "latency-degradation".into(),
            enabled: true,
            metric: MetricField::AvgDurationMs,
            comparison: Comparison::Gt,
            threshold: 2000.0,
            window_minutes: 5,
            severity: Severity::Warning,
            actions: vec![
                AlertAction::Log,
                AlertAction::Notify {
                    channel: NotificationChannel::Email,
                },
            ],
        });
        self.register_rule(AlertRule {
            id: Uuid::new_v4(),
            name: "largest-paint-regression".into(),
            enabled: true,
            metric: MetricField::LargestPaintMs,
            comparison: Comparison::Gt,
            threshold: 4000.0,
            window_minutes: 15,
            severity: Severity::Warning,
            actions: vec![AlertAction::Log],
        });
    }
}
