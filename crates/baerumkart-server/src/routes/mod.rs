pub mod broker;
pub mod sessions;

use axum::{routing::get, Json, Router};

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/sessions", sessions::router())
        .nest("/broker", broker::router())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
