use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{handlers, state::AppState, websocket::websocket_handler};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        // Auth
        .route("/api/auth/verify", post(handlers::verify_wallet))
        // Signals
        .route(
            "/api/signals",
            get(handlers::list_signals).post(handlers::create_signal),
        )
        .route("/api/signals/:id", get(handlers::get_signal))
        .route("/api/signals/:id/settle", post(handlers::settle_signal))
        .route("/api/signals/:id/upvote", post(handlers::upvote_signal))
        // Wagers
        .route(
            "/api/signals/:id/wagers",
            get(handlers::list_signal_wagers).post(handlers::place_wager),
        )
        .route("/api/users/:address/portfolio", get(handlers::get_portfolio))
        // Providers
        .route("/api/providers/leaderboard", get(handlers::get_leaderboard))
        .route("/api/providers/:address", get(handlers::get_provider))
        // Access tiers and credits
        .route("/api/access/:address/tier", get(handlers::get_tier))
        .route("/api/access/:address/credits", get(handlers::get_credits))
        .route("/api/access/consume", post(handlers::consume_access))
        .route("/api/packages", get(handlers::list_packages))
        .route("/api/purchases", post(handlers::purchase_package))
        .route("/api/stakes", post(handlers::create_stake))
        .route("/api/stakes/:id/unstake", post(handlers::unstake))
        // Knowledge pool
        .route(
            "/api/knowledge",
            get(handlers::list_knowledge).post(handlers::create_knowledge),
        )
        .route("/api/knowledge/:id/vote", post(handlers::vote_knowledge))
        .route("/api/knowledge/:id/query", post(handlers::query_knowledge))
        // Remote market resolution
        .route("/api/markets/callback", post(handlers::market_callback))
        // WebSocket endpoint
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
