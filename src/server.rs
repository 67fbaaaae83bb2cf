//! HTTP front end over the query layer.
//!
//! Three routes: `POST /tools/search` runs a search/count/aggregate request,
//! `GET /tools/capabilities` describes the query surface, and `GET /health`
//! reports liveness. Errors are returned as a JSON envelope
//! `{"error": {"code", "message"}}` with 400 for caller mistakes and 500
//! for everything else.

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::HttpEmbedder;
use crate::query::{self, QueryError, SearchRequest};
use crate::store::{BookmarkStore, VisitStore};

#[derive(Clone)]
struct AppState {
    visits: VisitStore,
    bookmarks: BookmarkStore,
    embedder: Arc<HttpEmbedder>,
}

pub fn router(config: &Config, pool: SqlitePool) -> Router {
    let state = AppState {
        visits: VisitStore::new(pool.clone()),
        bookmarks: BookmarkStore::new(pool),
        embedder: Arc::new(HttpEmbedder::new(&config.embedding)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/search", post(handle_search))
        .route("/tools/capabilities", get(handle_capabilities))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: &Config, pool: SqlitePool) -> Result<()> {
    let app = router(config, pool);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    println!("Listening on http://{}", config.server.bind);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Response {
    match query::run_query(&state.visits, &state.bookmarks, state.embedder.as_ref(), &req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(QueryError::BadRequest(msg)) => error_response(StatusCode::BAD_REQUEST, "bad_request", &msg),
        Err(QueryError::Internal(e)) => {
            eprintln!("Warning: search request failed: {e:#}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Internal server error",
            )
        }
    }
}

async fn handle_capabilities() -> Response {
    Json(query::capabilities()).into_response()
}

async fn handle_health() -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": code, "message": message } })),
    )
        .into_response()
}
