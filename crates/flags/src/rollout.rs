//! Gradual rollout plans. Each plan is an ordered list of
//! (percentage, hold) steps; the next due step is persisted as a timestamp
//! on the plan and applied by a periodic due-check rather than an in-memory
//! timer chain, so a missed tick only delays a step instead of dropping it.

use crate::store::FlagStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use guard_core::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One step of a gradual rollout. A zero hold marks the terminal step: the
/// percentage is applied and nothing further is scheduled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RolloutStep {
    pub percentage: u8,
    pub hold_secs: i64,
}

/// Rollout schedule for one flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutPlan {
    pub flag_id: String,
    pub steps: Vec<RolloutStep>,
    /// Index of the step currently applied, once started.
    pub current_step: Option<usize>,
    /// When the next step fires. `None` means not started or complete.
    pub next_step_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub started_by: Option<String>,
}

impl RolloutPlan {
    pub fn is_active(&self) -> bool {
        self.next_step_at.is_some()
    }
}

/// Owns the plan table and the due-check that advances in-flight rollouts.
pub struct RolloutScheduler {
    store: Arc<FlagStore>,
    plans: DashMap<String, RolloutPlan>,
}

impl RolloutScheduler {
    pub fn new(store: Arc<FlagStore>) -> Self {
        Self {
            store,
            plans: DashMap::new(),
        }
    }

    /// Register (or replace) the plan for a flag. Does not start it.
    pub fn set_plan(&self, flag_id: impl Into<String>, steps: Vec<RolloutStep>) {
        let flag_id = flag_id.into();
        self.plans.insert(
            flag_id.clone(),
            RolloutPlan {
                flag_id,
                steps,
                current_step: None,
                next_step_at: None,
                started_at: None,
                started_by: None,
            },
        );
    }

    pub fn plan(&self, flag_id: &str) -> Option<RolloutPlan> {
        self.plans.get(flag_id).map(|e| e.value().clone())
    }

    pub fn list_plans(&self) -> Vec<RolloutPlan> {
        let mut plans: Vec<_> = self.plans.iter().map(|e| e.value().clone()).collect();
        plans.sort_by(|a, b| a.flag_id.cmp(&b.flag_id));
        plans
    }

    /// Start a gradual rollout: apply the first step's percentage now and arm
    /// the next step after the first step's hold elapses.
    pub fn start(&self, flag_id: &str, actor: &str, now: DateTime<Utc>) -> GuardResult<RolloutPlan> {
        if !self.store.contains(flag_id) {
            return Err(GuardError::FlagNotFound(flag_id.to_string()));
        }
        let mut entry = self
            .plans
            .get_mut(flag_id)
            .ok_or_else(|| GuardError::NoPlanConfigured(flag_id.to_string()))?;
        if entry.steps.is_empty() {
            return Err(GuardError::NoPlanConfigured(flag_id.to_string()));
        }

        let first = entry.steps[0];
        let total = entry.steps.len();
        self.store.set_percentage(
            flag_id,
            first.percentage,
            actor,
            Some(&format!("gradual rollout step 1/{total}")),
        )?;

        entry.current_step = Some(0);
        entry.started_at = Some(now);
        entry.started_by = Some(actor.to_string());
        entry.next_step_at = if first.hold_secs > 0 && total > 1 {
            Some(now + Duration::seconds(first.hold_secs))
        } else {
            None
        };
        info!(
            flag_id = %flag_id,
            pct = first.percentage,
            steps = total,
            actor = %actor,
            "Gradual rollout started"
        );
        Ok(entry.clone())
    }

    /// Apply every step whose due timestamp has passed. Called from the
    /// due-check tick; returns the (flag, percentage) pairs applied. A
    /// pending step fires even if the percentage was manually changed or the
    /// flag disabled in the meantime: last-scheduled-write-wins.
    pub fn advance_due(&self, now: DateTime<Utc>) -> Vec<(String, u8)> {
        let mut applied = Vec::new();
        for mut entry in self.plans.iter_mut() {
            let due = match entry.next_step_at {
                Some(at) if at <= now => true,
                _ => false,
            };
            if !due {
                continue;
            }

            let next_index = entry.current_step.map_or(0, |i| i + 1);
            let total = entry.steps.len();
            let Some(step) = entry.steps.get(next_index).copied() else {
                entry.next_step_at = None;
                continue;
            };

            let actor = entry.started_by.clone().unwrap_or_else(|| "rollout".into());
            let reason = format!("gradual rollout step {}/{total}", next_index + 1);
            match self
                .store
                .set_percentage(&entry.flag_id, step.percentage, &actor, Some(&reason))
            {
                Ok(_) => {
                    entry.current_step = Some(next_index);
                    let has_more = next_index + 1 < total;
                    entry.next_step_at = if step.hold_secs > 0 && has_more {
                        Some(now + Duration::seconds(step.hold_secs))
                    } else {
                        None
                    };
                    applied.push((entry.flag_id.clone(), step.percentage));
                }
                Err(e) => {
                    warn!(flag_id = %entry.flag_id, error = %e, "Rollout step failed, plan abandoned");
                    entry.next_step_at = None;
                }
            }
        }
        applied
    }

    /// Default ramp for the checkout rewrite: 10% for 30 minutes, 25% for an
    /// hour, 50% for two hours, then full exposure.
    pub fn seed_default_plans(&self) {
        self.set_plan(
            "checkout-v2",
            vec![
                RolloutStep { percentage: 10, hold_secs: 1800 },
                RolloutStep { percentage: 25, hold_secs: 3600 },
                RolloutStep { percentage: 50, hold_secs: 7200 },
                RolloutStep { percentage: 100, hold_secs: 0 },
            ],
        );
    }
}
