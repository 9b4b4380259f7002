use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use ethers::signers::{LocalWallet, Signer};
use serde_json::{json, Value};
use sigmarket::adapters::{DisabledMarketGateway, NotificationSink, SqliteStore, StaticBalances};
use sigmarket::api::{create_router, AppState};
use sigmarket::config::AppConfig;
use sigmarket::signing::SessionTokens;
use std::sync::Arc;
use tower::ServiceExt;

const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const BETTOR: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
const BETTOR_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
const ADMIN_TOKEN: &str = "admin-test-token";

struct TestContext {
    app: Router,
    state: AppState,
}

impl TestContext {
    async fn new(admin_token: Option<&str>) -> Self {
        let mut config = AppConfig::default_config();
        config.auth.admin_token = admin_token.map(str::to_string);

        let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
        let balances = StaticBalances::new();
        balances.set(ADDRESS, 500);

        let state = AppState::build(
            config,
            store,
            Arc::new(balances),
            Arc::new(DisabledMarketGateway),
            NotificationSink::disabled(),
        )
        .expect("app state");

        Self {
            app: create_router(state.clone()),
            state,
        }
    }
}

async fn signed_auth(key: &str, address: &str) -> Value {
    let wallet: LocalWallet = key.parse().expect("test key");
    let message = format!("Sign in to sigmarket\nTimestamp: {}", Utc::now().timestamp());
    let signature = wallet
        .sign_message(message.as_str())
        .await
        .expect("signing failed");
    json!({
        "address": address,
        "message": message,
        "signature": format!("0x{}", signature),
    })
}

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (key, value) in headers {
        request_builder = request_builder.header(*key, *value);
    }

    let request = if let Some(payload) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("failed to build json request")
    } else {
        request_builder
            .body(Body::empty())
            .expect("failed to build empty request")
    };

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, body)
}

fn signal_body(auth: Option<Value>) -> Value {
    let mut body = json!({
        "asset": "ETH",
        "direction": "LONG",
        "entry_price": "3000",
        "target_price": "3300",
        "stop_loss": "2850",
        "timeframe": "3d",
        "deadline": (Utc::now() + Duration::days(3)).to_rfc3339(),
        "reasoning": "Range breakout with rising volume",
    });
    if let Some(auth) = auth {
        body["auth"] = auth;
    }
    body
}

#[tokio::test]
async fn health_reports_database() {
    let ctx = TestContext::new(None).await;
    let (status, body) = send_json(&ctx.app, Method::GET, "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn session_token_flow_creates_wagers_and_settles() {
    let ctx = TestContext::new(Some(ADMIN_TOKEN)).await;

    // provider signs in once and uses the bearer token afterwards
    let auth = signed_auth(KEY, ADDRESS).await;
    let (status, body) = send_json(&ctx.app, Method::POST, "/api/auth/verify", &[], Some(auth)).await;
    assert_eq!(status, StatusCode::OK, "verify failed: {body}");
    assert_eq!(body["data"]["address"], ADDRESS);
    let token = body["data"]["token"].as_str().expect("token").to_string();
    let bearer = format!("Bearer {token}");

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        "/api/signals",
        &[("authorization", bearer.as_str())],
        Some(signal_body(None)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ACTIVE");
    assert_eq!(body["data"]["karma_at_submit"], 50);
    let signal_id = body["data"]["id"].as_str().expect("signal id").to_string();

    // bettor signs inline instead of holding a session
    let bettor_auth = signed_auth(BETTOR_KEY, BETTOR).await;
    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        &format!("/api/signals/{signal_id}/wagers"),
        &[],
        Some(json!({ "auth": bettor_auth, "side": "YES", "stake": 40 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "wager failed: {body}");
    assert_eq!(body["data"]["side"], "HIT");
    assert_eq!(body["data"]["odds_bps"], 5000);

    let settle_uri = format!("/api/signals/{signal_id}/settle");
    let settle = json!({ "outcome": "HIT", "result_price": "3310" });

    let (status, _) = send_json(&ctx.app, Method::POST, &settle_uri, &[], Some(settle.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        &settle_uri,
        &[("x-admin-token", ADMIN_TOKEN)],
        Some(settle.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "settle failed: {body}");
    assert_eq!(body["data"]["signal"]["status"], "SETTLED");
    assert_eq!(body["data"]["provider_karma"], 60);
    assert_eq!(body["data"]["wagers"][0]["status"], "WON");
    assert_eq!(body["data"]["wagers"][0]["payout"], 80);

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        &settle_uri,
        &[("x-admin-token", ADMIN_TOKEN)],
        Some(settle),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap_or_default().contains("already"));

    let (status, body) = send_json(
        &ctx.app,
        Method::GET,
        &format!("/api/users/{BETTOR}/portfolio"),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["realized_pnl"], 40);

    let provider = ctx.state.store.get_provider(ADDRESS).await.unwrap().unwrap();
    assert_eq!(provider.karma, 60);
}

#[tokio::test]
async fn forged_signature_is_rejected_without_detail() {
    let ctx = TestContext::new(None).await;

    // signed by the bettor key but claiming the provider address
    let mut auth = signed_auth(BETTOR_KEY, BETTOR).await;
    auth["address"] = json!(ADDRESS);

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        "/api/signals",
        &[],
        Some(signal_body(Some(auth))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid signature");

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        "/api/signals",
        &[("authorization", "Bearer not-a-token")],
        Some(signal_body(None)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid signature");
}

#[tokio::test]
async fn token_minted_with_sample_secret_is_rejected() {
    let ctx = TestContext::new(None).await;
    assert!(ctx.state.config.validate().is_ok());

    let auth = signed_auth(KEY, ADDRESS).await;
    let (status, body) = send_json(&ctx.app, Method::POST, "/api/signals", &[], Some(signal_body(Some(auth)))).await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    let signal_id = body["data"]["id"].as_str().expect("signal id").to_string();

    // an attacker who knows the old sample secret mints a token for a wallet that never signed
    let forged = SessionTokens::new("change-me-in-production", 3600)
        .issue(BETTOR, Utc::now())
        .expect("issue");
    let bearer = format!("Bearer {}", forged.token);

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        &format!("/api/signals/{signal_id}/wagers"),
        &[("authorization", bearer.as_str())],
        Some(json!({ "side": "HIT", "stake": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid signature");

    let wagers = ctx.state.wagers.list_for_bettor(BETTOR).await.unwrap();
    assert!(wagers.is_empty());
}

#[tokio::test]
async fn malformed_bodies_use_the_error_envelope() {
    let ctx = TestContext::new(None).await;

    let (status, body) = send_json(
        &ctx.app,
        Method::POST,
        "/api/signals",
        &[],
        Some(json!({ "asset": "ETH" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let auth = signed_auth(KEY, ADDRESS).await;
    let mut bad_direction = signal_body(Some(auth));
    bad_direction["direction"] = json!("SIDEWAYS");
    let (status, body) = send_json(&ctx.app, Method::POST, "/api/signals", &[], Some(bad_direction)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("SIDEWAYS"));
}

#[tokio::test]
async fn admin_routes_are_unavailable_without_a_token() {
    let ctx = TestContext::new(None).await;
    let (status, _) = send_json(
        &ctx.app,
        Method::POST,
        "/api/markets/callback",
        &[("x-admin-token", "anything")],
        Some(json!({ "market_id": "mkt_1", "outcome": "HIT" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unknown_signal_is_404() {
    let ctx = TestContext::new(None).await;
    let (status, body) = send_json(&ctx.app, Method::GET, "/api/signals/sig_missing", &[], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap_or_default().contains("sig_missing"));
}

#[tokio::test]
async fn tier_and_packages_are_public_reads() {
    let ctx = TestContext::new(None).await;

    let (status, body) = send_json(
        &ctx.app,
        Method::GET,
        &format!("/api/access/{ADDRESS}/tier?feature=KNOWLEDGE_QUERY"),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "tier failed: {body}");
    assert_eq!(body["data"]["tier"], "WHALE");

    let (status, body) = send_json(&ctx.app, Method::GET, "/api/packages", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(4));
}
