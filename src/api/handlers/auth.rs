use axum::{extract::State, Json};
use chrono::Utc;
use tracing::info;

use crate::api::{
    error::{ApiJson, ApiResult},
    state::AppState,
    types::{ApiResponse, VerifyRequest},
};
use crate::signing::SessionToken;

/// POST /api/auth/verify
///
/// Checks a signed, timestamped message and issues a bearer token for the
/// recovered address.
pub async fn verify_wallet(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> ApiResult<Json<ApiResponse<SessionToken>>> {
    let now = Utc::now();
    let address = state
        .verifier
        .verify(&req.message, &req.signature, &req.address, now)?;
    let session = state.sessions.issue(&address, now)?;

    info!(address = %address, "Wallet verified; session issued");
    Ok(Json(ApiResponse::ok("signature verified", session)))
}
