//! REST handlers for flag administration, sample ingest, manual rollback,
//! and the operations dashboard. Admin operations validate at the boundary
//! and answer with explicit success/failure payloads; the evaluation path
//! never fails a request over flag state.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use guard_core::types::{EvalContext, MetricSample, WebVitals};
use guard_core::GuardError;
use guard_flags::{FeatureFlagEngine, RolloutScheduler};
use guard_rollback::{RollbackController, TriggeredBy};
use guard_telemetry::{AlertEngine, HealthCheckRunner, MetricsAggregator, Notifier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FeatureFlagEngine>,
    pub scheduler: Arc<RolloutScheduler>,
    pub aggregator: Arc<MetricsAggregator>,
    pub alerts: Arc<AlertEngine>,
    pub controller: Arc<RollbackController>,
    pub health: Arc<HealthCheckRunner>,
    pub notifier: Arc<Notifier>,
    pub node_id: String,
    pub start_time: Instant,
    pub window_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "invalid_request".into(),
            message: message.into(),
        }),
    )
}

fn map_guard_error(e: GuardError) -> ApiError {
    let status = match &e {
        GuardError::FlagNotFound(_)
        | GuardError::TriggerNotFound(_)
        | GuardError::NoPlanConfigured(_) => StatusCode::NOT_FOUND,
        GuardError::InvalidRange(_) | GuardError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let error = match &e {
        GuardError::FlagNotFound(_) => "flag_not_found",
        GuardError::TriggerNotFound(_) => "trigger_not_found",
        GuardError::NoPlanConfigured(_) => "no_plan_configured",
        GuardError::InvalidRange(_) => "invalid_range",
        GuardError::Validation(_) => "validation_failed",
        _ => "internal_error",
    };
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            message: e.to_string(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct AdminResponse {
    pub success: bool,
    pub message: String,
}

// ─── Flag administration ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdateRolloutRequest {
    pub percentage: Option<i64>,
    pub updated_by: Option<String>,
}

/// POST /v1/flags/{id}/rollout
pub async fn update_rollout(
    State(state): State<AppState>,
    Path(flag_id): Path<String>,
    Json(request): Json<UpdateRolloutRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    let Some(percentage) = request.percentage else {
        return Err(bad_request("'percentage' is required"));
    };
    let Some(updated_by) = request.updated_by.filter(|s| !s.is_empty()) else {
        return Err(bad_request("'updated_by' is required"));
    };

    let flag = state
        .engine
        .update_rollout_percentage(&flag_id, percentage, &updated_by)
        .map_err(map_guard_error)?;
    metrics::counter!("api.rollout_updates").increment(1);
    Ok(Json(AdminResponse {
        success: true,
        message: format!("{} now at {}%", flag.id, flag.rollout_percentage),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StartGradualRequest {
    pub updated_by: Option<String>,
}

/// POST /v1/flags/{id}/gradual
pub async fn start_gradual(
    State(state): State<AppState>,
    Path(flag_id): Path<String>,
    Json(request): Json<StartGradualRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    let Some(updated_by) = request.updated_by.filter(|s| !s.is_empty()) else {
        return Err(bad_request("'updated_by' is required"));
    };

    let plan = state
        .scheduler
        .start(&flag_id, &updated_by, Utc::now())
        .map_err(map_guard_error)?;
    Ok(Json(AdminResponse {
        success: true,
        message: format!(
            "gradual rollout started for {} ({} steps)",
            flag_id,
            plan.steps.len()
        ),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: Option<bool>,
    pub updated_by: Option<String>,
}

/// POST /v1/flags/{id}/toggle
pub async fn toggle_flag(
    State(state): State<AppState>,
    Path(flag_id): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    let Some(enabled) = request.enabled else {
        return Err(bad_request("'enabled' is required"));
    };
    let Some(updated_by) = request.updated_by.filter(|s| !s.is_empty()) else {
        return Err(bad_request("'updated_by' is required"));
    };

    let flag = state
        .engine
        .toggle(&flag_id, enabled, &updated_by)
        .map_err(map_guard_error)?;
    Ok(Json(AdminResponse {
        success: true,
        message: format!(
            "{} {}",
            flag.id,
            if flag.enabled { "enabled" } else { "disabled" }
        ),
    }))
}

/// GET /v1/flags
pub async fn list_flags(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.store().list())
}

#[derive(Debug, Deserialize)]
pub struct EvaluateQuery {
    pub user_id: Option<String>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub flag_id: String,
    pub enabled: bool,
}

/// GET /v1/flags/{id}/evaluate
pub async fn evaluate_flag(
    State(state): State<AppState>,
    Path(flag_id): Path<String>,
    Query(query): Query<EvaluateQuery>,
) -> Json<EvaluateResponse> {
    let ctx = EvalContext {
        user_id: query.user_id,
        country: query.country,
        user_agent: query.user_agent,
        attributes: Default::default(),
    };
    metrics::counter!("api.flag_evaluations").increment(1);
    Json(EvaluateResponse {
        enabled: state.engine.is_enabled(&flag_id, &ctx),
        flag_id,
    })
}

// ─── Sample ingest ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IngestSampleRequest {
    pub route: String,
    pub method: String,
    pub duration_ms: u64,
    pub status_code: u16,
    #[serde(default)]
    pub web_vitals: Option<WebVitals>,
}

/// POST /v1/samples — the routing collaborator pushes one record per
/// observed request.
pub async fn ingest_sample(
    State(state): State<AppState>,
    Json(request): Json<IngestSampleRequest>,
) -> StatusCode {
    state.aggregator.record_sample(MetricSample {
        timestamp: Utc::now(),
        route: request.route,
        method: request.method,
        duration_ms: request.duration_ms,
        status_code: request.status_code,
        web_vitals: request.web_vitals,
    });
    metrics::counter!("api.samples_ingested").increment(1);
    StatusCode::ACCEPTED
}

// ─── Manual rollback ────────────────────────────────────────────────────

/// The seeded trigger the manual endpoint fires.
const MANUAL_TRIGGER: &str = "manual-emergency";

#[derive(Debug, Deserialize)]
pub struct ManualRollbackRequest {
    pub reason: Option<String>,
    pub triggered_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub success: bool,
    pub event_id: Uuid,
    pub message: String,
}

/// POST /v1/rollback
pub async fn manual_rollback(
    State(state): State<AppState>,
    Json(request): Json<ManualRollbackRequest>,
) -> Result<Json<RollbackResponse>, ApiError> {
    let Some(reason) = request.reason.filter(|s| !s.is_empty()) else {
        return Err(bad_request("'reason' is required"));
    };
    let Some(triggered_by) = request.triggered_by.filter(|s| !s.is_empty()) else {
        return Err(bad_request("'triggered_by' is required"));
    };

    let trigger = state
        .controller
        .trigger_by_name(MANUAL_TRIGGER)
        .ok_or_else(|| {
            map_guard_error(GuardError::TriggerNotFound(MANUAL_TRIGGER.into()))
        })?;

    let reason = format!("{reason} (requested by {triggered_by})");
    let event_id = state
        .controller
        .clone()
        .trigger_rollback(trigger.id, TriggeredBy::Manual, &reason)
        .map_err(map_guard_error)?;

    warn!(event_id = %event_id, triggered_by = %triggered_by, "Manual rollback requested");
    metrics::counter!("api.manual_rollbacks").increment(1);
    Ok(Json(RollbackResponse {
        success: true,
        event_id,
        message: "rollback started".into(),
    }))
}

// ─── Dashboard ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DashboardSnapshot {
    pub monitoring: MonitoringPanel,
    pub rollout: RolloutPanel,
    pub rollback: RollbackPanel,
}

#[derive(Debug, Serialize)]
pub struct MonitoringPanel {
    pub stats: guard_core::types::WindowStats,
    pub sample_count: usize,
    pub recent_alerts: Vec<guard_telemetry::FiredAlert>,
    pub health_failures: u32,
    pub recent_notifications: Vec<guard_telemetry::Notification>,
}

#[derive(Debug, Serialize)]
pub struct RolloutPanel {
    pub flags: Vec<guard_flags::FeatureFlag>,
    pub plans: Vec<guard_flags::RolloutPlan>,
    pub recent_changes: Vec<guard_flags::FlagChange>,
}

#[derive(Debug, Serialize)]
pub struct RollbackPanel {
    pub stats: guard_rollback::RollbackStats,
    pub recent_events: Vec<guard_rollback::RollbackEvent>,
}

/// GET /v1/dashboard — one composite read for the operations view.
pub async fn dashboard(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(DashboardSnapshot {
        monitoring: MonitoringPanel {
            stats: state.aggregator.compute_stats(state.window_minutes),
            sample_count: state.aggregator.sample_count(),
            recent_alerts: state.alerts.recent_alerts(20),
            health_failures: state.health.failure_count(),
            recent_notifications: state.notifier.recent(20),
        },
        rollout: RolloutPanel {
            flags: state.engine.store().list(),
            plans: state.scheduler.list_plans(),
            recent_changes: state.engine.store().recent_changes(20),
        },
        rollback: RollbackPanel {
            stats: state.controller.stats(),
            recent_events: state.controller.recent_events(20),
        },
    })
}

// ─── Operational endpoints ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — readiness probe.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.start_time.elapsed().as_secs() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
