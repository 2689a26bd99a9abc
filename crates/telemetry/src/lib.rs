pub mod aggregator;
pub mod alerts;
pub mod health;
pub mod notify;

pub use aggregator::MetricsAggregator;
pub use alerts::{AlertAction, AlertEngine, AlertRule, Comparison, FiredAlert, MetricField};
pub use health::{HealthCheck, HealthCheckRunner, ProbeMethod, ProbeOutcome};
pub use notify::{Notification, Notifier};
