use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::api::{
    auth::authenticate,
    error::{ApiJson, ApiResult},
    state::AppState,
    types::*,
};
use crate::domain::{KnowledgeEntry, KnowledgeSummary, VoteDirection};
use crate::error::MarketError;
use crate::services::KnowledgeAnswer;
use crate::validation::clamp_limit;

/// GET /api/knowledge
pub async fn list_knowledge(
    State(state): State<AppState>,
    Query(params): Query<KnowledgeQuery>,
) -> ApiResult<Json<ApiResponse<Vec<KnowledgeSummary>>>> {
    let entries = state
        .knowledge
        .list_entries(params.category.as_deref(), clamp_limit(params.limit))
        .await?;
    Ok(Json(ApiResponse::ok(
        format!("{} entries", entries.len()),
        entries,
    )))
}

/// POST /api/knowledge
pub async fn create_knowledge(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreateKnowledgeRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<KnowledgeEntry>>)> {
    let contributor = authenticate(&state, &headers, req.auth.as_ref())?;
    let entry = state
        .knowledge
        .create_entry(&contributor, req.to_new_entry())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("entry created", entry)),
    ))
}

/// POST /api/knowledge/:id/vote
pub async fn vote_knowledge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<VoteRequest>,
) -> ApiResult<Json<ApiResponse<KnowledgeEntry>>> {
    let voter = authenticate(&state, &headers, req.auth.as_ref())?;
    let direction = VoteDirection::try_from(req.direction.as_str()).map_err(MarketError::Validation)?;

    let entry = state.knowledge.vote(&id, &voter, direction).await?;
    Ok(Json(ApiResponse::ok("vote recorded", entry)))
}

/// POST /api/knowledge/:id/query
pub async fn query_knowledge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<ApiJson<QueryEntryRequest>>,
) -> ApiResult<Json<ApiResponse<KnowledgeAnswer>>> {
    let (auth, accept_fee) = match body {
        Some(ApiJson(req)) => (req.auth, req.accept_fee),
        None => (None, false),
    };
    let caller = authenticate(&state, &headers, auth.as_ref())?;

    let answer = state.knowledge.query_entry(&id, &caller, accept_fee).await?;
    Ok(Json(ApiResponse::ok("entry unlocked", answer)))
}
