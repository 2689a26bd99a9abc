//! DeployGuard: deployment safety control loop for the booking platform.
//!
//! Main entry point. Constructs every component explicitly, wires them
//! together, spawns the periodic evaluation ticks, and starts the API
//! server.

use chrono::Utc;
use clap::Parser;
use guard_api::{ApiServer, AppState};
use guard_core::config::AppConfig;
use guard_flags::{FeatureFlagEngine, FlagStore, RolloutScheduler};
use guard_rollback::{RollbackController, TriggeredBy};
use guard_telemetry::{AlertEngine, HealthCheckRunner, MetricsAggregator, Notifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "deploy-guard")]
#[command(about = "Deployment safety control loop: feature flags, live metrics, automatic rollback")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "DEPLOY_GUARD__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "DEPLOY_GUARD__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "DEPLOY_GUARD__API__METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Serve the API without the background evaluation ticks
    #[arg(long, default_value_t = false)]
    no_ticks: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_guard=info,guard_flags=info,guard_telemetry=info,guard_rollback=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("DeployGuard starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.api.metrics_port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.api.metrics_port,
        "Configuration loaded"
    );

    // One instance of everything per process, wired explicitly.
    let dispatch_timeout = Duration::from_millis(config.telemetry.dispatch_timeout_ms);

    let store = Arc::new(FlagStore::new());
    store.seed_defaults();

    let engine = Arc::new(FeatureFlagEngine::new(store.clone()));

    let scheduler = Arc::new(RolloutScheduler::new(store.clone()));
    scheduler.seed_default_plans();

    let notifier = Arc::new(Notifier::new());

    let aggregator = Arc::new(MetricsAggregator::new(config.telemetry.buffer_capacity));

    let alerts = Arc::new(AlertEngine::new(notifier.clone(), dispatch_timeout));
    alerts.seed_default_rules();

    let controller = Arc::new(RollbackController::new(
        engine.clone(),
        notifier.clone(),
        config.rollback.history_limit,
        dispatch_timeout,
    ));
    controller.seed_default_triggers();

    let health = Arc::new(HealthCheckRunner::new(notifier.clone()));
    health.seed_default_checks(
        &format!("http://127.0.0.1:{}", config.api.http_port),
        config.health.probe_timeout_ms,
        config.health.probe_interval_secs,
    );

    if cli.no_ticks {
        info!("Running without background evaluation ticks (--no-ticks)");
    } else {
        spawn_ticks(
            &config,
            scheduler.clone(),
            aggregator.clone(),
            alerts.clone(),
            controller.clone(),
            health.clone(),
        );
    }

    let state = AppState {
        engine,
        scheduler,
        aggregator,
        alerts,
        controller,
        health,
        notifier,
        node_id: config.node_id.clone(),
        start_time: Instant::now(),
        window_minutes: config.telemetry.window_minutes,
    };

    let api_server = ApiServer::new(config, state);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("DeployGuard is ready");

    // Blocks until shutdown.
    api_server.start_http().await?;

    Ok(())
}

/// Spawn the fixed-interval evaluation loops. Each tick does its own bounded
/// amount of work; outbound dispatch inside a tick is fire-and-forget.
fn spawn_ticks(
    config: &AppConfig,
    scheduler: Arc<RolloutScheduler>,
    aggregator: Arc<MetricsAggregator>,
    alerts: Arc<AlertEngine>,
    controller: Arc<RollbackController>,
    health: Arc<HealthCheckRunner>,
) {
    // Alert rule evaluation; rollback signals raised by matched rules are
    // forwarded to the controller, which still enforces cooldowns.
    let alert_interval = Duration::from_secs(config.telemetry.alert_interval_secs);
    {
        let aggregator = aggregator.clone();
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(alert_interval);
            loop {
                interval.tick().await;
                let now = Utc::now();
                let fired = alerts.evaluate_at(&aggregator, now);
                for alert in fired {
                    for trigger_name in &alert.rollback_signals {
                        let Some(trigger) = controller.trigger_by_name(trigger_name) else {
                            error!(trigger = %trigger_name, "Alert references unknown rollback trigger");
                            continue;
                        };
                        if !trigger.enabled || trigger.in_cooldown(now) {
                            continue;
                        }
                        let reason = format!("alert rule '{}' signalled rollback", alert.rule_name);
                        if let Err(e) = controller
                            .run_trigger(trigger.id, TriggeredBy::System, &reason, now)
                            .await
                        {
                            error!(error = %e, trigger = %trigger_name, "Rollback signal failed");
                        }
                    }
                }
            }
        });
    }

    // Rollback trigger evaluation against the rolling window.
    let trigger_interval = Duration::from_secs(config.rollback.trigger_interval_secs);
    let window_minutes = config.telemetry.window_minutes;
    {
        let aggregator = aggregator.clone();
        let controller = controller.clone();
        let health = health.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(trigger_interval);
            loop {
                interval.tick().await;
                let now = Utc::now();
                let stats = aggregator.compute_stats_at(window_minutes, now);
                controller
                    .evaluate_triggers(&stats, health.failure_count(), now)
                    .await;
            }
        });
    }

    // Gradual rollout due-check.
    let due_interval = Duration::from_secs(config.rollout.due_check_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(due_interval);
        loop {
            interval.tick().await;
            for (flag_id, pct) in scheduler.advance_due(Utc::now()) {
                info!(flag_id = %flag_id, pct = pct, "Rollout step applied");
            }
        }
    });

    // One probe loop per registered health check, each on its own interval.
    for check in health.list() {
        if !check.enabled {
            continue;
        }
        let health = health.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(check.interval_secs));
            loop {
                interval.tick().await;
                health.run_check(&check.name).await;
            }
        });
    }
}
