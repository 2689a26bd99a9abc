//! Per-request flag decisions: condition evaluation plus deterministic
//! percentage bucketing, and the emergency rollback sweep.

use crate::store::{FeatureFlag, FlagStore};
use guard_core::types::EvalContext;
use guard_core::{GuardError, GuardResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Decides whether a flag is active for a given request context and owns the
/// mutation entry points the admin surface and rollback actions go through.
pub struct FeatureFlagEngine {
    store: Arc<FlagStore>,
}

impl FeatureFlagEngine {
    pub fn new(store: Arc<FlagStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<FlagStore> {
        &self.store
    }

    /// Deterministic bucket in [0, 100) for an identity on a flag. A plain
    /// byte fold: stable across calls and process restarts for the same
    /// input, roughly uniform, and cheap. Not cryptographic on purpose.
    pub fn stable_bucket(flag_id: &str, identity: &str) -> u8 {
        let key = format!("{flag_id}:{identity}");
        let hash = key
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        (hash % 100) as u8
    }

    /// Decide whether `flag_id` is active for this context.
    ///
    /// Never errors: an unknown or disabled flag degrades to `false` so the
    /// request-serving path cannot fail on flag evaluation. Anonymous callers
    /// bucket under the shared `anonymous` identity (see
    /// [`EvalContext::bucketing_identity`]).
    pub fn is_enabled(&self, flag_id: &str, ctx: &EvalContext) -> bool {
        let Some(flag) = self.store.get(flag_id) else {
            return false;
        };
        if !flag.enabled {
            return false;
        }
        if !flag.conditions.iter().all(|c| c.matches(ctx)) {
            return false;
        }
        match flag.rollout_percentage {
            0 => false,
            100 => true,
            pct => Self::stable_bucket(flag_id, ctx.bucketing_identity()) < pct,
        }
    }

    /// Admin entry point for manual percentage updates.
    pub fn update_rollout_percentage(
        &self,
        flag_id: &str,
        pct: i64,
        actor: &str,
    ) -> GuardResult<FeatureFlag> {
        if !(0..=100).contains(&pct) {
            return Err(GuardError::InvalidRange(pct));
        }
        self.store.set_percentage(flag_id, pct as u8, actor, None)
    }

    pub fn toggle(&self, flag_id: &str, enabled: bool, actor: &str) -> GuardResult<FeatureFlag> {
        self.store.set_enabled(flag_id, enabled, actor)
    }

    /// Force every enabled flag with nonzero exposure to 0%, stamping an
    /// audit marker with the actor and reason. Safe to call repeatedly: a
    /// second sweep finds nothing left to zero.
    pub fn emergency_rollback(&self, reason: &str, actor: &str) -> Vec<String> {
        let mut affected = Vec::new();
        for flag in self.store.list() {
            if flag.enabled && flag.rollout_percentage > 0 {
                match self
                    .store
                    .set_percentage(&flag.id, 0, actor, Some(reason))
                {
                    Ok(_) => affected.push(flag.id),
                    Err(e) => warn!(flag_id = %flag.id, error = %e, "Emergency rollback skipped flag"),
                }
            }
        }
        if affected.is_empty() {
            info!(actor = %actor, "Emergency rollback: no exposed flags");
        } else {
            warn!(actor = %actor, reason = %reason, flags = ?affected, "Emergency rollback executed");
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guard_core::types::{ConditionOp, FlagCondition};

    fn engine_with(id: &str, enabled: bool, pct: u8, conditions: Vec<FlagCondition>) -> FeatureFlagEngine {
        let store = Arc::new(FlagStore::new());
        let now = Utc::now();
        store.insert(FeatureFlag {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            enabled,
            rollout_percentage: pct,
            conditions,
            created_at: now,
            updated_at: now,
            updated_by: "test".into(),
        });
        FeatureFlagEngine::new(store)
    }

    #[test]
    fn test_known_bucket_fixtures() {
        // Fixed points of the byte-fold hash; these pin the bucketing
        // algorithm so a change to it fails loudly.
        assert_eq!(FeatureFlagEngine::stable_bucket("checkout-v2", "user-41"), 20);
        assert_eq!(FeatureFlagEngine::stable_bucket("checkout-v2", "user-3"), 80);
        assert_eq!(FeatureFlagEngine::stable_bucket("checkout-v2", "anonymous"), 2);
    }

    #[test]
    fn test_fifty_percent_split_on_fixed_users() {
        let engine = engine_with("checkout-v2", true, 50, Vec::new());
        // bucket 20 < 50 => enabled, bucket 80 >= 50 => disabled
        assert!(engine.is_enabled("checkout-v2", &EvalContext::for_user("user-41")));
        assert!(!engine.is_enabled("checkout-v2", &EvalContext::for_user("user-3")));
    }

    #[test]
    fn test_determinism_across_calls() {
        let engine = engine_with("checkout-v2", true, 37, Vec::new());
        let ctx = EvalContext::for_user("user-42");
        let first = engine.is_enabled("checkout-v2", &ctx);
        for _ in 0..100 {
            assert_eq!(engine.is_enabled("checkout-v2", &ctx), first);
        }
    }

    #[test]
    fn test_monotonic_exposure() {
        let low = engine_with("checkout-v2", true, 30, Vec::new());
        let high = engine_with("checkout-v2", true, 60, Vec::new());

        for i in 0..1000 {
            let ctx = EvalContext::for_user(format!("synthetic-{i}"));
            if low.is_enabled("checkout-v2", &ctx) {
                // raising the percentage never removes an enabled user
                assert!(high.is_enabled("checkout-v2", &ctx));
            }
        }
    }

    #[test]
    fn test_boundary_percentages() {
        let zero = engine_with("f", true, 0, Vec::new());
        let full = engine_with("f", true, 100, Vec::new());
        for i in 0..200 {
            let ctx = EvalContext::for_user(format!("u{i}"));
            assert!(!zero.is_enabled("f", &ctx));
            assert!(full.is_enabled("f", &ctx));
        }
        // anonymous contexts follow the same boundaries
        assert!(!zero.is_enabled("f", &EvalContext::default()));
        assert!(full.is_enabled("f", &EvalContext::default()));
    }

    #[test]
    fn test_anonymous_shared_bucket() {
        // anonymous bucket for checkout-v2 is 2: everyone below 3% is in
        let engine = engine_with("checkout-v2", true, 3, Vec::new());
        assert!(engine.is_enabled("checkout-v2", &EvalContext::default()));
        let engine = engine_with("checkout-v2", true, 2, Vec::new());
        assert!(!engine.is_enabled("checkout-v2", &EvalContext::default()));
    }

    #[test]
    fn test_unknown_and_disabled_degrade_to_false() {
        let engine = engine_with("f", false, 100, Vec::new());
        assert!(!engine.is_enabled("f", &EvalContext::for_user("u")));
        assert!(!engine.is_enabled("nope", &EvalContext::for_user("u")));
    }

    #[test]
    fn test_conditions_gate_before_bucketing() {
        let cond = FlagCondition::Country {
            op: ConditionOp::Eq,
            values: vec!["DE".into()],
        };
        let engine = engine_with("f", true, 100, vec![cond]);

        let mut ctx = EvalContext::for_user("user-1");
        assert!(!engine.is_enabled("f", &ctx)); // country missing => fail
        ctx.country = Some("US".into());
        assert!(!engine.is_enabled("f", &ctx));
        ctx.country = Some("DE".into());
        assert!(engine.is_enabled("f", &ctx));
    }

    #[test]
    fn test_update_percentage_validation() {
        let engine = engine_with("f", true, 10, Vec::new());
        assert!(matches!(
            engine.update_rollout_percentage("f", 101, "ops").unwrap_err(),
            GuardError::InvalidRange(101)
        ));
        assert!(matches!(
            engine.update_rollout_percentage("f", -1, "ops").unwrap_err(),
            GuardError::InvalidRange(-1)
        ));
        assert!(matches!(
            engine.update_rollout_percentage("missing", 50, "ops").unwrap_err(),
            GuardError::FlagNotFound(_)
        ));
        let updated = engine.update_rollout_percentage("f", 50, "ops").unwrap();
        assert_eq!(updated.rollout_percentage, 50);
    }

    #[test]
    fn test_emergency_rollback_idempotent() {
        let store = Arc::new(FlagStore::new());
        store.seed_defaults();
        let engine = FeatureFlagEngine::new(store.clone());
        engine.update_rollout_percentage("checkout-v2", 50, "ops").unwrap();

        let affected = engine.emergency_rollback("elevated error rate", "system");
        // checkout-v2 (50), instant-booking (100), new-pricing-banner (25)
        assert_eq!(affected.len(), 3);
        for id in &affected {
            assert_eq!(store.get(id).unwrap().rollout_percentage, 0);
        }
        // audit entries carry the reason
        assert!(store
            .recent_changes(20)
            .iter()
            .any(|c| c.reason.as_deref() == Some("elevated error rate") && c.actor == "system"));

        // second sweep finds nothing
        assert!(engine.emergency_rollback("elevated error rate", "system").is_empty());
    }
}
