pub mod engine;
pub mod rollout;
pub mod store;

pub use engine::FeatureFlagEngine;
pub use rollout::{RolloutPlan, RolloutScheduler, RolloutStep};
pub use store::{FeatureFlag, FlagChange, FlagStore};
