use axum::{extract::State, http::HeaderMap, Json};
use tracing::info;

use crate::adapters::SettlementReport;
use crate::api::{
    auth::ensure_admin,
    error::{ApiJson, ApiResult},
    state::AppState,
    types::*,
};

/// POST /api/markets/callback (admin)
///
/// Resolution pushed by the remote market service; settles the linked signal.
pub async fn market_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<MarketCallbackRequest>,
) -> ApiResult<Json<ApiResponse<SettlementReport>>> {
    ensure_admin(&state, &headers)?;
    let outcome = parse_outcome(&req.outcome)?;

    info!(market_id = %req.market_id, outcome = %outcome, "Market resolution received");
    let report = state
        .signals
        .on_market_resolved(&req.market_id, outcome, req.result_price)
        .await?;
    state.broadcast(WsMessage::SignalSettled(report.signal.clone()));

    Ok(Json(ApiResponse::ok("market resolved", report)))
}
