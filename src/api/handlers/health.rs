use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::warn;

use crate::api::{state::AppState, types::HealthResponse};

/// GET /health -- liveness plus a database round trip
pub async fn health_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Health check database ping failed");
            false
        }
    };

    let resp = HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        database,
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}
