//! JSON routes over an [`InferenceApi`].
//!
//! Successful responses are `{"status":"success","data":…}`; failures are
//! `{"status":"error","message":…}` with a status code per [`ApiError`] kind.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ApiError, ApiResult, InferenceApi};

pub type SharedApi = Arc<dyn InferenceApi>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match self {
            ApiError::Validation(m) | ApiError::NotFound(m) | ApiError::Unavailable(m) | ApiError::Internal(m) => m,
        };
        (code, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "status": "success", "data": data })).into_response()
}

fn reply<T: Serialize>(res: ApiResult<T>) -> Response {
    match res {
        Ok(v) => ok(v),
        Err(e) => e.into_response(),
    }
}

pub fn router(api: SharedApi) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/topics/active", get(active))
        .route("/api/topics/inference", get(inference))
        .route("/api/topics/inferences", get(inferences))
        .route("/api/topics/latest", get(latest))
        .route("/api/topics/collect", post(collect))
        .route("/api/topics/add", post(add))
        .route("/api/topics/remove", post(remove))
        .route("/api/topics/heights", get(heights))
        .route("/api/topics/stats", get(stats))
        .route("/api/topics/range", get(range))
        .with_state(api)
}

#[derive(Debug, Deserialize)]
pub struct TopicQuery {
    #[serde(default)]
    pub topic_id: String,
    pub height: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopicBody {
    #[serde(default)]
    pub topic_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HeightsQuery {
    #[serde(default)]
    pub topic_id: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub topic_id: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

async fn health(State(api): State<SharedApi>) -> Response {
    reply(api.health().await)
}

async fn active(State(api): State<SharedApi>) -> Response {
    reply(api.active_topics().await)
}

async fn inference(State(api): State<SharedApi>, Query(q): Query<TopicQuery>) -> Response {
    reply(api.stored_at(&q.topic_id, q.height.as_deref()).await)
}

async fn inferences(State(api): State<SharedApi>) -> Response {
    reply(api.all_latest().await)
}

async fn latest(State(api): State<SharedApi>, Query(q): Query<TopicQuery>) -> Response {
    reply(api.latest_for(&q.topic_id).await)
}

async fn collect(State(api): State<SharedApi>, Json(body): Json<TopicBody>) -> Response {
    reply(api.force_refresh(&body.topic_id).await)
}

async fn add(State(api): State<SharedApi>, Json(body): Json<TopicBody>) -> Response {
    reply(api.add_active_topic(&body.topic_id).await)
}

async fn remove(State(api): State<SharedApi>, Json(body): Json<TopicBody>) -> Response {
    reply(api.remove_active_topic(&body.topic_id).await)
}

async fn heights(State(api): State<SharedApi>, Query(q): Query<HeightsQuery>) -> Response {
    reply(api.block_heights(&q.topic_id, q.limit.unwrap_or(100), q.offset.unwrap_or(0)).await)
}

async fn stats(State(api): State<SharedApi>, Query(q): Query<TopicQuery>) -> Response {
    reply(api.topic_stats(&q.topic_id).await)
}

async fn range(State(api): State<SharedApi>, Query(q): Query<RangeQuery>) -> Response {
    let (start, end) = match parse_window(q.start.as_deref(), q.end.as_deref(), Utc::now()) {
        Ok(w) => w,
        Err(e) => return e.into_response(),
    };
    reply(api.history(&q.topic_id, start, end).await)
}

/// Resolve an optional RFC 3339 window; defaults to the 24 hours ending now.
pub fn parse_window(
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
    let parse = |name: &str, s: &str| {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ApiError::Validation(format!("{} must be RFC 3339: {}", name, e)))
    };
    let end = match end.filter(|s| !s.trim().is_empty()) {
        Some(s) => parse("end", s)?,
        None => now,
    };
    let start = match start.filter(|s| !s.trim().is_empty()) {
        Some(s) => parse("start", s)?,
        None => end - Duration::hours(24),
    };
    if start > end {
        return Err(ApiError::Validation("start must not be after end".into()));
    }
    Ok((start, end))
}
