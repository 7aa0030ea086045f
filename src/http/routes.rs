//! Route handlers for the gateway.
//!
//! The handlers only acknowledge what they received; the work behind each
//! route lives in the services the gateway fronts.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::ratelimit::SuspiciousClients;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(Json(payload): Json<LoginRequest>) -> impl IntoResponse {
    if payload.password.is_empty() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid credentials" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "email": payload.email })),
    )
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
}

pub async fn signup(Json(payload): Json<SignupRequest>) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(json!({ "status": "created", "email": payload.email })),
    )
}

pub async fn api_status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn upload(body: Bytes) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "receivedBytes": body.len() })),
    )
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn search(Query(params): Query<SearchParams>) -> impl IntoResponse {
    Json(json!({ "query": params.q, "results": [] }))
}

/// Clients that have tripped the auth limiter.
pub async fn suspicious_clients(
    State(suspicious): State<Arc<SuspiciousClients>>,
) -> impl IntoResponse {
    Json(suspicious.list())
}
