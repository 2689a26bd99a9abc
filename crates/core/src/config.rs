use serde::Deserialize;

/// Root application configuration. Loaded from environment variables with
/// the prefix `DEPLOY_GUARD__` and double-underscore section separators.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Ring buffer capacity for request samples.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Window used when alert rules and rollback triggers read stats.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    #[serde(default = "default_alert_interval_secs")]
    pub alert_interval_secs: u64,
    /// Upper bound on a single notification dispatch.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RolloutConfig {
    /// How often due gradual-rollout steps are checked and applied.
    #[serde(default = "default_due_check_interval_secs")]
    pub due_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollbackConfig {
    #[serde(default = "default_trigger_interval_secs")]
    pub trigger_interval_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_node_id() -> String {
    "guard-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_buffer_capacity() -> usize {
    1000
}
fn default_window_minutes() -> i64 {
    5
}
fn default_alert_interval_secs() -> u64 {
    30
}
fn default_dispatch_timeout_ms() -> u64 {
    5000
}
fn default_due_check_interval_secs() -> u64 {
    5
}
fn default_trigger_interval_secs() -> u64 {
    30
}
fn default_history_limit() -> usize {
    500
}
fn default_probe_interval_secs() -> u64 {
    60
}
fn default_probe_timeout_ms() -> u64 {
    3000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            window_minutes: default_window_minutes(),
            alert_interval_secs: default_alert_interval_secs(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
        }
    }
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            due_check_interval_secs: default_due_check_interval_secs(),
        }
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            trigger_interval_secs: default_trigger_interval_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            telemetry: TelemetryConfig::default(),
            rollout: RolloutConfig::default(),
            rollback: RollbackConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("DEPLOY_GUARD")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.telemetry.buffer_capacity, 1000);
        assert_eq!(cfg.telemetry.window_minutes, 5);
        assert_eq!(cfg.rollback.trigger_interval_secs, 30);
        assert_eq!(cfg.api.http_port, 8080);
    }
}
