use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use dictamesh_runtime::{CheckResult, HealthState};

use crate::app::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.probes.liveness())
}

/// Readiness: startup gate plus one check per dependency (store, fabric,
/// every registered adapter). Degraded still serves; unhealthy answers
/// 503 so clients can route around this node.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = Vec::new();

    let catalog = state.catalog.clone();
    let sqlite = tokio::task::spawn_blocking(move || catalog.event_partitions()).await;
    checks.push(match sqlite {
        Ok(Ok(_)) => CheckResult::healthy("sqlite"),
        Ok(Err(err)) => CheckResult::unhealthy("sqlite", err.to_string()),
        Err(err) => CheckResult::unhealthy("sqlite", err.to_string()),
    });

    checks.push(if state.broker.topic_names().is_empty() {
        CheckResult::unhealthy("fabric", "no topics provisioned")
    } else {
        CheckResult::healthy("fabric")
    });

    checks.extend(state.registry.health_checks().await);

    let report = state.probes.readiness(checks);
    let status = match report.state {
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}
