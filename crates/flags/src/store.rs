//! In-memory feature flag table with audit-stamped mutations and an
//! append-only change log. Flags are seeded at process start and mutated in
//! place by admin calls and rollback actions; they are never deleted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use guard_core::types::{ConditionOp, FlagCondition};
use guard_core::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// A feature flag definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Stable slug used as the lookup key, e.g. `checkout-v2`.
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    /// Fraction of evaluated identities the flag resolves enabled for.
    /// Invariant: 0..=100, enforced at every mutation site.
    pub rollout_percentage: u8,
    pub conditions: Vec<FlagCondition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

/// One audit record for a flag mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagChange {
    pub id: Uuid,
    pub flag_id: String,
    pub change: String,
    pub actor: String,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// In-memory flag table. One instance per process, wired through the
/// dependency boundary rather than held in a global.
pub struct FlagStore {
    flags: DashMap<String, FeatureFlag>,
    changes: DashMap<Uuid, FlagChange>,
}

impl Default for FlagStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagStore {
    pub fn new() -> Self {
        Self {
            flags: DashMap::new(),
            changes: DashMap::new(),
        }
    }

    pub fn insert(&self, flag: FeatureFlag) {
        info!(flag_id = %flag.id, pct = flag.rollout_percentage, "Feature flag registered");
        self.flags.insert(flag.id.clone(), flag);
    }

    pub fn get(&self, flag_id: &str) -> Option<FeatureFlag> {
        self.flags.get(flag_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, flag_id: &str) -> bool {
        self.flags.contains_key(flag_id)
    }

    pub fn list(&self) -> Vec<FeatureFlag> {
        let mut flags: Vec<_> = self.flags.iter().map(|e| e.value().clone()).collect();
        flags.sort_by(|a, b| a.id.cmp(&b.id));
        flags
    }

    /// Set a flag's rollout percentage, stamping audit fields and appending a
    /// change record in the same mutation.
    pub fn set_percentage(
        &self,
        flag_id: &str,
        pct: u8,
        actor: &str,
        reason: Option<&str>,
    ) -> GuardResult<FeatureFlag> {
        if pct > 100 {
            return Err(GuardError::InvalidRange(pct as i64));
        }
        let mut entry = self
            .flags
            .get_mut(flag_id)
            .ok_or_else(|| GuardError::FlagNotFound(flag_id.to_string()))?;
        let previous = entry.rollout_percentage;
        entry.rollout_percentage = pct;
        entry.updated_at = Utc::now();
        entry.updated_by = actor.to_string();
        let updated = entry.clone();
        drop(entry);

        self.log_change(
            flag_id,
            format!("rollout_percentage {previous} -> {pct}"),
            actor,
            reason,
        );
        info!(flag_id = %flag_id, from = previous, to = pct, actor = %actor, "Rollout percentage updated");
        Ok(updated)
    }

    /// Flip the enabled bit.
    pub fn set_enabled(&self, flag_id: &str, enabled: bool, actor: &str) -> GuardResult<FeatureFlag> {
        let mut entry = self
            .flags
            .get_mut(flag_id)
            .ok_or_else(|| GuardError::FlagNotFound(flag_id.to_string()))?;
        let previous = entry.enabled;
        entry.enabled = enabled;
        entry.updated_at = Utc::now();
        entry.updated_by = actor.to_string();
        let updated = entry.clone();
        drop(entry);

        self.log_change(flag_id, format!("enabled {previous} -> {enabled}"), actor, None);
        info!(flag_id = %flag_id, enabled = enabled, actor = %actor, "Flag toggled");
        Ok(updated)
    }

    fn log_change(&self, flag_id: &str, change: String, actor: &str, reason: Option<&str>) {
        let record = FlagChange {
            id: Uuid::new_v4(),
            flag_id: flag_id.to_string(),
            change,
            actor: actor.to_string(),
            reason: reason.map(|r| r.to_string()),
            changed_at: Utc::now(),
        };
        self.changes.insert(record.id, record);
    }

    /// Most recent change records, newest first.
    pub fn recent_changes(&self, limit: usize) -> Vec<FlagChange> {
        let mut changes: Vec<_> = self.changes.iter().map(|e| e.value().clone()).collect();
        changes.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        changes.truncate(limit);
        changes
    }

    /// Seed the booking-platform flags this deployment gates.
    pub fn seed_defaults(&self) {
        let now = Utc::now();
        let seeded = vec![
            FeatureFlag {
                id: "checkout-v2".into(),
                name: "Checkout v2".into(),
                description: "Rewritten checkout flow with split payment support".into(),
                enabled: true,
                rollout_percentage: 0,
                conditions: Vec::new(),
                created_at: now,
                updated_at: now,
                updated_by: "seed".into(),
            },
            FeatureFlag {
                id: "instant-booking".into(),
                name: "Instant booking".into(),
                description: "Confirm reservations without host approval".into(),
                enabled: true,
                rollout_percentage: 100,
                conditions: Vec::new(),
                created_at: now,
                updated_at: now,
                updated_by: "seed".into(),
            },
            FeatureFlag {
                id: "new-pricing-banner".into(),
                name: "New pricing banner".into(),
                description: "Total-price-first banner on search results".into(),
                enabled: true,
                rollout_percentage: 25,
                conditions: vec![FlagCondition::Country {
                    op: ConditionOp::In,
                    values: vec!["DE".into(), "AT".into(), "CH".into()],
                }],
                created_at: now,
                updated_at: now,
                updated_by: "seed".into(),
            },
            FeatureFlag {
                id: "host-dashboard-beta".into(),
                name: "Host dashboard beta".into(),
                description: "Redesigned host earnings dashboard".into(),
                enabled: false,
                rollout_percentage: 0,
                conditions: Vec::new(),
                created_at: now,
                updated_at: now,
                updated_by: "seed".into(),
            },
        ];
        for flag in seeded {
            self.insert(flag);
        }
        info!("Default feature flags seeded");
    }
}
