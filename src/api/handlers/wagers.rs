use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::authenticate,
    error::{ApiJson, ApiResult},
    state::AppState,
    types::*,
};
use crate::domain::{Portfolio, Wager};
use crate::validation::validate_address;

/// GET /api/signals/:id/wagers
pub async fn list_signal_wagers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<Wager>>>> {
    let wagers = state.wagers.list_for_signal(&id).await?;
    Ok(Json(ApiResponse::ok(
        format!("{} wagers", wagers.len()),
        wagers,
    )))
}

/// POST /api/signals/:id/wagers
pub async fn place_wager(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PlaceWagerRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Wager>>)> {
    let bettor = authenticate(&state, &headers, req.auth.as_ref())?;
    let side = parse_outcome(&req.side)?;

    let wager = state.wagers.place_wager(&bettor, &id, side, req.stake).await?;
    state.broadcast(WsMessage::WagerPlaced(wager.clone()));

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("wager placed", wager)),
    ))
}

/// GET /api/users/:address/portfolio
pub async fn get_portfolio(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<ApiResponse<Portfolio>>> {
    let address = validate_address(&address, "address")?;
    let portfolio = state.wagers.portfolio(&address).await?;
    Ok(Json(ApiResponse::ok("portfolio", portfolio)))
}
