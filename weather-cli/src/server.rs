//! HTTP front-end: `POST /weather` with `{"query": "..."}` returns `{"answer": "..."}`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use weather_core::Pipeline;

const EMPTY_QUERY_ANSWER: &str = "Please enter a query.";

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AskResponse {
    pub answer: String,
}

/// Any origin may call the API, so a browser front-end can be served from elsewhere.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new().route("/weather", post(ask)).with_state(pipeline).layer(cors)
}

pub async fn serve(pipeline: Arc<Pipeline>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "Failed to listen for shutdown signal");
            }
        })
        .await
        .context("Server error")
}

async fn ask(
    State(pipeline): State<Arc<Pipeline>>,
    Json(payload): Json<AskRequest>,
) -> (StatusCode, Json<AskResponse>) {
    match pipeline.answer(&payload.query).await {
        Ok(outcome) => (StatusCode::OK, Json(AskResponse { answer: outcome.answer })),
        Err(_) => (
            StatusCode::BAD_REQUEST,
            Json(AskResponse { answer: EMPTY_QUERY_ANSWER.to_string() }),
        ),
    }
}
