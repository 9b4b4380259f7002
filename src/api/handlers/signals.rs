use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::adapters::{SettlementReport, SignalFilter};
use crate::api::{
    auth::{authenticate, ensure_admin},
    error::{ApiJson, ApiResult},
    state::AppState,
    types::*,
};
use crate::domain::{Signal, SignalStatus};
use crate::error::MarketError;
use crate::validation::{clamp_limit, validate_address};

/// GET /api/signals
pub async fn list_signals(
    State(state): State<AppState>,
    Query(params): Query<SignalQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Signal>>>> {
    let status = params
        .status
        .as_deref()
        .map(SignalStatus::try_from)
        .transpose()
        .map_err(MarketError::Validation)?;
    let provider = params
        .provider
        .as_deref()
        .map(|p| validate_address(p, "provider"))
        .transpose()?;

    let filter = SignalFilter {
        status,
        provider,
        limit: clamp_limit(params.limit),
    };
    let signals = state.signals.list_signals(&filter).await?;
    Ok(Json(ApiResponse::ok(
        format!("{} signals", signals.len()),
        signals,
    )))
}

/// POST /api/signals
pub async fn create_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateSignalRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Signal>>)> {
    let provider = authenticate(&state, &headers, req.auth.as_ref())?;
    let input = req.to_new_signal()?;

    let signal = state.signals.create_signal(&provider, input).await?;
    state.broadcast(WsMessage::SignalCreated(signal.clone()));

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("signal created", signal)),
    ))
}

/// GET /api/signals/:id
pub async fn get_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Signal>>> {
    let signal = state.signals.get_signal(&id).await?;
    Ok(Json(ApiResponse::ok("signal", signal)))
}

/// POST /api/signals/:id/settle (admin)
pub async fn settle_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SettleRequest>,
) -> ApiResult<Json<ApiResponse<SettlementReport>>> {
    ensure_admin(&state, &headers)?;
    let outcome = parse_outcome(&req.outcome)?;

    let report = state
        .signals
        .settle_signal(&id, outcome, req.result_price)
        .await?;
    state.broadcast(WsMessage::SignalSettled(report.signal.clone()));

    Ok(Json(ApiResponse::ok(
        format!("signal {} settled {}", id, outcome),
        report,
    )))
}

/// POST /api/signals/:id/upvote
pub async fn upvote_signal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<ApiJson<AuthOnlyRequest>>,
) -> ApiResult<Json<ApiResponse<UpvoteResponse>>> {
    let req = body.map(|ApiJson(r)| r).unwrap_or_default();
    let voter = authenticate(&state, &headers, req.auth.as_ref())?;

    let upvotes = state.signals.upvote(&id, &voter).await?;
    state.broadcast(WsMessage::SignalUpvoted {
        signal_id: id.clone(),
        upvotes,
    });

    Ok(Json(ApiResponse::ok(
        "upvote recorded",
        UpvoteResponse {
            signal_id: id,
            upvotes,
        },
    )))
}
