use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::api::{error::ApiResult, state::AppState, types::*};
use crate::domain::ProviderStats;
use crate::services::ProviderProfile;
use crate::validation::{clamp_limit, validate_address};

/// GET /api/providers/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<Json<ApiResponse<Vec<ProviderStats>>>> {
    let board = state.signals.leaderboard(clamp_limit(params.limit)).await?;
    Ok(Json(ApiResponse::ok("leaderboard", board)))
}

/// GET /api/providers/:address
pub async fn get_provider(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<ApiResponse<ProviderProfile>>> {
    let address = validate_address(&address, "address")?;
    let profile = state.signals.provider_profile(&address).await?;
    Ok(Json(ApiResponse::ok("provider", profile)))
}
