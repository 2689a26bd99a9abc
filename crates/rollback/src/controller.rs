//! Rollback trigger evaluation and mitigation execution. Triggers are
//! AND-combined conditions over the aggregator's rolling stats plus the
//! health probe failure count; a full match creates a rollback event whose
//! actions run strictly in order, one at a time, failing fast.

use crate::events::{
    EventHistory, EventStatus, RollbackAction, RollbackActionKind, RollbackEvent, RollbackStats,
    TriggeredBy,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use guard_core::types::{NotificationChannel, Severity, WebVital, WindowStats};
use guard_core::{GuardError, GuardResult};
use guard_flags::FeatureFlagEngine;
use guard_telemetry::Notifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Actor stamped on flag mutations made by rollback actions.
const ROLLBACK_ACTOR: &str = "rollback-controller";

/// One condition a trigger evaluates against aggregated state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    ErrorRateAbove { pct: f64 },
    AvgDurationAbove { ms: f64 },
    WebVitalAbove { vital: WebVital, threshold: f64 },
    HealthCheckFailures { at_least: u32 },
}

impl TriggerCondition {
    pub fn matches(&self, stats: &WindowStats, health_failures: u32) -> bool {
        match self {
            Self::ErrorRateAbove { pct } => stats.error_rate_pct > *pct,
            Self::AvgDurationAbove { ms } => stats.avg_duration_ms > *ms,
            Self::WebVitalAbove { vital, threshold } => stats.vitals.value(*vital) > *threshold,
            Self::HealthCheckFailures { at_least } => health_failures >= *at_least,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackTrigger {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    /// AND-combined. A trigger with no conditions never fires automatically;
    /// it exists for the manual path.
    pub conditions: Vec<TriggerCondition>,
    pub actions: Vec<RollbackAction>,
    pub severity: Severity,
    pub cooldown_secs: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl RollbackTrigger {
    /// Ineligible strictly before `last_triggered_at + cooldown`; eligible
    /// again from that instant on.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered_at
            .map_or(false, |t| now < t + Duration::seconds(self.cooldown_secs))
    }
}

pub struct RollbackController {
    triggers: DashMap<Uuid, RollbackTrigger>,
    history: EventHistory,
    engine: Arc<FeatureFlagEngine>,
    notifier: Arc<Notifier>,
    dispatch_timeout: std::time::Duration,
}

impl RollbackController {
    pub fn new(
        engine: Arc<FeatureFlagEngine>,
        notifier: Arc<Notifier>,
        history_limit: usize,
        dispatch_timeout: std::time::Duration,
    ) -> Self {
        Self {
            triggers: DashMap::new(),
            history: EventHistory::new(history_limit),
            engine,
            notifier,
            dispatch_timeout,
        }
    }

    pub fn register_trigger(&self, trigger: RollbackTrigger) {
        info!(trigger = %trigger.name, enabled = trigger.enabled, "Rollback trigger registered");
        self.triggers.insert(trigger.id, trigger);
    }

    pub fn list_triggers(&self) -> Vec<RollbackTrigger> {
        let mut triggers: Vec<_> = self.triggers.iter().map(|e| e.value().clone()).collect();
        triggers.sort_by(|a, b| a.name.cmp(&b.name));
        triggers
    }

    pub fn trigger_by_name(&self, name: &str) -> Option<RollbackTrigger> {
        self.triggers
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| e.value().clone())
    }

    /// Automatic path, run on the evaluation tick. Executes matched events
    /// to completion before returning so one tick observes the state the
    /// previous mitigation left behind.
    pub async fn evaluate_triggers(
        &self,
        stats: &WindowStats,
        health_failures: u32,
        now: DateTime<Utc>,
    ) -> Vec<Uuid> {
        let candidates: Vec<Uuid> = self
            .triggers
            .iter()
            .filter(|e| {
                let t = e.value();
                t.enabled
                    && !t.conditions.is_empty()
                    && !t.in_cooldown(now)
                    && t.conditions.iter().all(|c| c.matches(stats, health_failures))
            })
            .map(|e| *e.key())
            .collect();

        let mut fired = Vec::new();
        for trigger_id in candidates {
            let reason = format!(
                "conditions matched at error_rate={:.2}% avg_duration={:.0}ms health_failures={}",
                stats.error_rate_pct, stats.avg_duration_ms, health_failures
            );
            match self.run_trigger(trigger_id, TriggeredBy::System, &reason, now).await {
                Ok(event_id) => fired.push(event_id),
                Err(e) => error!(error = %e, "Trigger evaluation failed to fire"),
            }
        }
        fired
    }

    /// Shared firing path: stamps cooldown bookkeeping, freezes the action
    /// snapshot, creates the event, and executes it to completion.
    pub async fn run_trigger(
        &self,
        trigger_id: Uuid,
        triggered_by: TriggeredBy,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Uuid> {
        let event = self.create_event(trigger_id, triggered_by, reason, now)?;
        let event_id = event.id;
        self.execute_event(event_id).await;
        Ok(event_id)
    }

    /// Manual path. Skips condition evaluation, still updates the trigger's
    /// cooldown window, and returns the event id while the actions execute
    /// on a spawned task.
    pub fn trigger_rollback(
        self: Arc<Self>,
        trigger_id: Uuid,
        triggered_by: TriggeredBy,
        reason: &str,
    ) -> GuardResult<Uuid> {
        let event = self.create_event(trigger_id, triggered_by, reason, Utc::now())?;
        let event_id = event.id;
        tokio::spawn(async move {
            self.execute_event(event_id).await;
        });
        Ok(event_id)
    }

    fn create_event(
        &self,
        trigger_id: Uuid,
        triggered_by: TriggeredBy,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<RollbackEvent> {
        let mut entry = self
            .triggers
            .get_mut(&trigger_id)
            .ok_or_else(|| GuardError::TriggerNotFound(trigger_id.to_string()))?;
        entry.last_triggered_at = Some(now);

        // Freeze the ordered snapshot: ascending order, declaration order on ties.
        let mut actions = entry.actions.clone();
        actions.sort_by_key(|a| a.order);

        let event = RollbackEvent {
            id: Uuid::new_v4(),
            trigger_id,
            trigger_name: entry.name.clone(),
            timestamp: now,
            reason: reason.to_string(),
            triggered_by,
            actions,
            status: EventStatus::Pending,
            completed_at: None,
            error: None,
        };
        drop(entry);

        warn!(
            event_id = %event.id,
            trigger = %event.trigger_name,
            triggered_by = ?triggered_by,
            reason = %reason,
            "Rollback event created"
        );
        self.history.insert(event.clone());
        Ok(event)
    }

    /// Execute an event's actions sequentially. The first failure marks the
    /// event failed and skips everything after it; already-applied actions
    /// are not undone.
    pub async fn execute_event(&self, event_id: Uuid) {
        let Some(event) = self.history.get(event_id) else {
            error!(event_id = %event_id, "Rollback event vanished before execution");
            return;
        };
        if self
            .history
            .transition(event_id, EventStatus::InProgress, None)
            .is_err()
        {
            warn!(event_id = %event_id, "Rollback event not pending, skipping execution");
            return;
        }

        for action in &event.actions {
            match self.execute_action(&action.kind, &event.reason).await {
                Ok(message) => {
                    info!(event_id = %event_id, order = action.order, message = %message, "Rollback action applied");
                }
                Err(e) => {
                    error!(
                        event_id = %event_id,
                        order = action.order,
                        error = %e,
                        "Rollback action failed, aborting remaining actions"
                    );
                    let _ = self
                        .history
                        .transition(event_id, EventStatus::Failed, Some(e.to_string()));
                    return;
                }
            }
        }
        let _ = self.history.transition(event_id, EventStatus::Completed, None);
        info!(event_id = %event_id, "Rollback event completed");
    }

    async fn execute_action(
        &self,
        kind: &RollbackActionKind,
        reason: &str,
    ) -> GuardResult<String> {
        match kind {
            RollbackActionKind::DisableFeature { flag } => {
                self.engine
                    .store()
                    .set_percentage(flag, 0, ROLLBACK_ACTOR, Some(reason))?;
                Ok(format!("{flag} forced to 0%"))
            }
            RollbackActionKind::ReduceRollout { flags, percentage } => {
                for flag_id in flags {
                    let flag = self
                        .engine
                        .store()
                        .get(flag_id)
                        .ok_or_else(|| GuardError::FlagNotFound(flag_id.clone()))?;
                    if flag.rollout_percentage > *percentage {
                        self.engine.store().set_percentage(
                            flag_id,
                            *percentage,
                            ROLLBACK_ACTOR,
                            Some(reason),
                        )?;
                    }
                }
                Ok(format!("{} flag(s) capped at {percentage}%", flags.len()))
            }
            RollbackActionKind::EmergencyRollback => {
                let affected = self.engine.emergency_rollback(reason, ROLLBACK_ACTOR);
                Ok(format!("emergency rollback zeroed {} flag(s)", affected.len()))
            }
            RollbackActionKind::Notify { channel, message } => {
                let send = self.notifier.send(
                    *channel,
                    Severity::Critical,
                    "Rollback mitigation",
                    message.clone(),
                );
                match tokio::time::timeout(self.dispatch_timeout, send).await {
                    Ok(Ok(_)) => Ok(format!("notification sent via {channel:?}")),
                    Ok(Err(e)) => Err(GuardError::ActionExecution(format!(
                        "notification failed: {e}"
                    ))),
                    Err(_) => Err(GuardError::ActionExecution(format!(
                        "notification timed out after {}ms",
                        self.dispatch_timeout.as_millis()
                    ))),
                }
            }
            RollbackActionKind::Redirect { target } => {
                warn!(target = %target, "Redirect action is not implemented, skipping");
                Ok("redirect skipped (not implemented)".into())
            }
        }
    }

    pub fn event(&self, id: Uuid) -> Option<RollbackEvent> {
        self.history.get(id)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<RollbackEvent> {
        self.history.recent(limit)
    }

    pub fn stats(&self) -> RollbackStats {
        self.history.stats()
    }

    /// Baseline triggers wired to the seeded booking-platform flags.
    pub fn seed_default_triggers(&self) {
        self.register_trigger(RollbackTrigger {
            id: Uuid::new_v4(),
            name: "error-rate-breach".into(),
            enabled: true,
            conditions: vec![TriggerCondition::ErrorRateAbove { pct: 10.0 }],
            actions: vec![
                RollbackAction {
                    order: 1,
                    kind: RollbackActionKind::DisableFeature {
                        flag: "checkout-v2".into(),
                    },
                },
                RollbackAction {
                    order: 2,
                    kind: RollbackActionKind::Notify {
                        channel: NotificationChannel::Webhook,
                        message: "checkout-v2 disabled after error rate breach".into(),
                    },
                },
            ],
            severity: Severity::Critical,
            cooldown_secs: 600,
            last_triggered_at: None,
        });
        self.register_trigger(RollbackTrigger {
            id: Uuid::new_v4(),
            name: "latency-breach".into(),
            enabled: true,
            conditions: vec![TriggerCondition::AvgDurationAbove { ms: 3000.0 }],
            actions: vec![
                RollbackAction {
                    order: 1,
                    kind: RollbackActionKind::ReduceRollout {
                        flags: vec!["checkout-v2".into(), "new-pricing-banner".into()],
                        percentage: 10,
                    },
                },
                RollbackAction {
                    order: 2,
                    kind: RollbackActionKind::Notify {
                        channel: NotificationChannel::Email,
                        message: "rollouts capped at 10% after latency breach".into(),
                    },
                },
            ],
            severity: Severity::Warning,
            cooldown_secs: 900,
            last_triggered_at: None,
        });
        self.register_trigger(RollbackTrigger {
            id: Uuid::new_v4(),
            name: "health-check-hard-down".into(),
            enabled: true,
            conditions: vec![TriggerCondition::HealthCheckFailures { at_least: 3 }],
            actions: vec![
                RollbackAction {
                    order: 1,
                    kind: RollbackActionKind::EmergencyRollback,
                },
                RollbackAction {
                    order: 2,
                    kind: RollbackActionKind::Notify {
                        channel: NotificationChannel::Webhook,
                        message: "emergency rollback after repeated health check failures".into(),
                    },
                },
            ],
            severity: Severity::Emergency,
            cooldown_secs: 1800,
            last_triggered_at: None,
        });
        // Manual-only trigger behind the admin rollback endpoint.
        self.register_trigger(RollbackTrigger {
            id: Uuid::new_v4(),
            name: "manual-emergency".into(),
            enabled: true,
            conditions: Vec::new(),
            actions: vec![
                RollbackAction {
                    order: 1,
                    kind: RollbackActionKind::EmergencyRollback,
                },
                RollbackAction {
                    order: 2,
                    kind: RollbackActionKind::Notify {
                        channel: NotificationChannel::Webhook,
                        message: "manual emergency rollback executed".into(),
                    },
                },
            ],
            severity: Severity::Emergency,
            cooldown_secs: 300,
            last_triggered_at: None,
        });
    }
}
