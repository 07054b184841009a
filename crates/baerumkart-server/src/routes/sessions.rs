use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use baerumkart_schema::Message;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubmitMessage {
    pub text: String,
}

#[derive(Serialize)]
pub struct Reply {
    pub reply: String,
}

#[derive(Serialize)]
pub struct Countdown {
    pub seconds: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/messages", post(submit_message).get(list_messages))
        .route("/{id}/countdown", get(countdown))
        .route("/{id}/reset", post(reset_session))
}

/// Blocks until the broker has answered; the client polls `countdown` meanwhile.
async fn submit_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SubmitMessage>,
) -> Result<Json<Reply>, StatusCode> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let reply = state.chat.submit_message(&id, text).await;
    Ok(Json(Reply { reply }))
}

async fn list_messages(State(state): State<AppState>, Path(id): Path<String>) -> Json<Vec<Message>> {
    Json(state.chat.transcript(&id).await)
}

async fn countdown(State(state): State<AppState>, Path(id): Path<String>) -> Json<Countdown> {
    Json(Countdown {
        seconds: state.chat.pending_delay_seconds(&id).await,
    })
}

async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !state.chat.reset(&id).await {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({ "status": "reset", "id": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use baerumkart_core::{BaerumkartConfig, ChatService, MainConfig, RulesConfig, Vocabulary};
    use baerumkart_knowledge::InMemoryStore;
    use baerumkart_provider::StubProvider;
    use tower::ServiceExt;

    fn setup_state() -> AppState {
        let main: MainConfig = main_config();
        let config = BaerumkartConfig {
            main,
            rules: RulesConfig::default(),
            vocabulary: Vocabulary::default(),
        };
        let chat = ChatService::with_parts(
            &config,
            Arc::new(Vocabulary::default()),
            Arc::new(InMemoryStore::default()),
            Arc::new(StubProvider),
        );
        AppState::new(chat)
    }

    fn main_config() -> MainConfig {
        serde_json::from_value(serde_json::json!({
            "app": {"name": "baerumkart", "env": "test"},
            "provider": {"type": "stub"},
            "knowledge": {"kind": "memory"}
        }))
        .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn submit_returns_reply_and_records_transcript() {
        let state = setup_state();
        let app = router().with_state(state.clone());

        let response = app
            .oneshot(post_json("/s1/messages", r#"{"text":"Hei"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["reply"].as_str().unwrap().starts_with("Hei!"));

        let response = router()
            .with_state(state)
            .oneshot(Request::builder().uri("/s1/messages").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        let messages = body.as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["isFromUser"], true);
        assert_eq!(messages[1]["isFromUser"], false);
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let app = router().with_state(setup_state());
        let response = app
            .oneshot(post_json("/s1/messages", r#"{"text":"   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn countdown_is_zero_when_idle() {
        let app = router().with_state(setup_state());
        let response = app
            .oneshot(Request::builder().uri("/s1/countdown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["seconds"], 0);
    }

    #[tokio::test]
    async fn reset_unknown_session_is_not_found() {
        let app = router().with_state(setup_state());
        let response = app
            .oneshot(post_json("/nobody/reset", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_transcript() {
        let state = setup_state();
        state.chat.submit_message("s1", "hei").await;

        let response = router()
            .with_state(state.clone())
            .oneshot(post_json("/s1/reset", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.chat.transcript("s1").await.is_empty());
    }
}
