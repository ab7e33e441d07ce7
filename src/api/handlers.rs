//! HTTP request handlers
//!
//! Dispatcher calls block on SQLite, so they run on the blocking pool.

use super::types::{ActionRequest, ErrorResponse, StartRequest, StatusResponse};
use super::AppState;
use crate::board::SupplyFilter;
use crate::db::{DbError, Status};
use crate::protocol::{status_listing, Reply, Sender};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversation
        .route("/api/start", post(start))
        .route("/api/action", post(action))
        // Read-only board
        .route("/api/status", get(status))
        // Version
        .route("/version", get(get_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================
// Conversation
// ============================================================

async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<Reply>, AppError> {
    check_sender(&req.user)?;
    let dispatcher = state.dispatcher.clone();
    let reply = blocking(move || dispatcher.start(&req.user)).await?;
    Ok(Json(reply))
}

async fn action(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> Result<Json<Reply>, AppError> {
    check_sender(&req.user)?;
    let dispatcher = state.dispatcher.clone();
    let reply = blocking(move || dispatcher.dispatch(&req.user, &req.data)).await?;
    Ok(Json(reply))
}

// ============================================================
// Status
// ============================================================

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let dispatcher = state.dispatcher.clone();
    let board = blocking(move || dispatcher.board(SupplyFilter::All)).await??;
    let response = StatusResponse {
        text: status_listing(&board),
        board,
    };
    Ok(Json(response))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("slot-exchange ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Helpers
// ============================================================

fn check_sender(sender: &Sender) -> Result<(), AppError> {
    if sender.id <= 0 {
        return Err(AppError::BadRequest(format!(
            "invalid user id {}",
            sender.id
        )));
    }
    Ok(())
}

async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("worker failed: {e}")))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err.status {
            Status::InternalError => {
                tracing::error!(error = %err, "Store failure");
                AppError::Internal(err.status.to_string())
            }
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::StatusBoard;
    use crate::ledger::testing::{date, ledger, ALICE};
    use crate::protocol::{Dispatcher, SystemClock};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let dispatcher = Dispatcher::new(ledger(), Arc::new(SystemClock), "about").unwrap();
        let state = AppState::new(dispatcher);
        (create_router(state.clone()), state)
    }

    async fn post_json(app: Router, uri: &str, body: &Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_start_returns_main_menu() {
        let (app, _) = app();
        let (status, body) = post_json(
            app,
            "/api/start",
            &json!({"user": {"id": 7, "nick": "gus", "fullname": "Gus G"}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["home"], false);
        assert_eq!(body["actions"][0]["data"], "sell");
    }

    #[tokio::test]
    async fn test_action_round_trip() {
        let (app, _) = app();
        let (status, body) = post_json(
            app,
            "/api/action",
            &json!({"user": {"id": 7, "nick": "gus"}, "data": "sell,1"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["back"], "sell");
        assert_eq!(body["actions"][0]["data"], "sell,1,1");
    }

    #[tokio::test]
    async fn test_bad_sender_is_rejected() {
        let (app, _) = app();
        let (status, body) = post_json(
            app,
            "/api/action",
            &json!({"user": {"id": 0}, "data": "status"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid user id"));
    }

    #[tokio::test]
    async fn test_status_text_matches_empty_board() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(body["board"]["places"].as_array().unwrap().is_empty());
        assert_eq!(body["text"], status_listing(&StatusBoard::default()));
    }

    #[tokio::test]
    async fn test_status_lists_future_offers() {
        let (app, state) = app();
        let today = state.dispatcher.today();
        let ahead = today + chrono::Days::new(400);
        // Past offers are filtered out, future ones are listed
        let ledger = state.dispatcher.ledger();
        ledger.add_sell(1, date("01.01.2020"), ALICE).unwrap();
        ledger.add_sell(1, ahead, ALICE).unwrap();

        let response = app
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        let dates = &body["board"]["places"][0]["sessions"][0]["dates"];
        assert_eq!(dates.as_array().unwrap().len(), 1);
        assert_eq!(dates[0]["date"], ahead.to_string());
        assert!(body["text"].as_str().unwrap().contains("@alice"));
    }
}
