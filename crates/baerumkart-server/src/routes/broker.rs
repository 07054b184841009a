use axum::{extract::State, routing::get, Json, Router};
use baerumkart_core::BrokerStats;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}

async fn stats(State(state): State<AppState>) -> Json<BrokerStats> {
    Json(state.chat.stats().await)
}
