use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::access::{AccessReceipt, CreditPackage, Feature, Purchase, Stake, TierQuote};
use crate::api::{
    auth::authenticate,
    error::{ApiJson, ApiResult},
    state::AppState,
    types::*,
};
use crate::error::MarketError;
use crate::services::{CreditSummary, Unstaked};
use crate::validation::validate_address;

fn parse_feature(raw: &str) -> Result<Feature, MarketError> {
    Feature::try_from(raw).map_err(MarketError::Validation)
}

/// GET /api/access/:address/tier?feature=
pub async fn get_tier(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<TierQuery>,
) -> ApiResult<Json<ApiResponse<TierQuote>>> {
    let address = validate_address(&address, "address")?;
    let feature = parse_feature(&params.feature)?;

    let quote = state
        .access
        .tier_for(&address, feature, params.premium)
        .await?;
    Ok(Json(ApiResponse::ok("tier quote", quote)))
}

/// GET /api/access/:address/credits
pub async fn get_credits(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<ApiResponse<CreditSummary>>> {
    let address = validate_address(&address, "address")?;
    let summary = state.access.credits(&address).await?;
    Ok(Json(ApiResponse::ok("credits", summary)))
}

/// POST /api/access/consume
pub async fn consume_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ConsumeRequest>,
) -> ApiResult<Json<ApiResponse<AccessReceipt>>> {
    let caller = authenticate(&state, &headers, req.auth.as_ref())?;
    let feature = parse_feature(&req.feature)?;

    let receipt = state
        .access
        .consume(
            &caller,
            feature,
            req.premium,
            req.accept_fee,
            req.reference.as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::ok("access granted", receipt)))
}

/// GET /api/packages
pub async fn list_packages(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<Vec<CreditPackage>>>> {
    Ok(Json(ApiResponse::ok(
        "packages",
        state.access.packages().to_vec(),
    )))
}

/// POST /api/purchases
pub async fn purchase_package(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PurchaseRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Purchase>>)> {
    let buyer = authenticate(&state, &headers, req.auth.as_ref())?;
    let purchase = state
        .access
        .purchase(&buyer, req.package.as_deref(), req.payment)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("package purchased", purchase)),
    ))
}

/// POST /api/stakes
pub async fn create_stake(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<StakeRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Stake>>)> {
    let holder = authenticate(&state, &headers, req.auth.as_ref())?;
    let stake = state.access.stake(&holder, req.amount).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("stake created", stake)),
    ))
}

/// POST /api/stakes/:id/unstake
pub async fn unstake(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<ApiJson<AuthOnlyRequest>>,
) -> ApiResult<Json<ApiResponse<Unstaked>>> {
    let req = body.map(|ApiJson(r)| r).unwrap_or_default();
    let holder = authenticate(&state, &headers, req.auth.as_ref())?;

    let unstaked = state.access.unstake(&holder, &id).await?;
    Ok(Json(ApiResponse::ok("stake withdrawn", unstaked)))
}
