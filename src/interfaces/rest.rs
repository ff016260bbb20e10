//! Control surface: thin request/response endpoints over the components.
//!
//! Responsibilities end at parameter validation, delegation and response
//! shaping. Client faults, service-unavailable and service errors map to
//! distinct statuses; a provider-exhausted upstream never takes the server
//! down with it.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::application::system::Application;
use crate::domain::errors::{MarketDataError, MergeError, TrainingError};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::has_known_venue;

/// Uniform error envelope for the control surface.
pub enum ApiError {
    /// Client fault: malformed symbol, unknown timeframe, bad horizon.
    Input(String),
    NotFound(String),
    /// Upstream exhausted or ensemble empty; retryable.
    Unavailable(String),
    /// Duplicate training job, carrying the existing id.
    Conflict { message: String, job_id: i64 },
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Input(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid_input", "message": message }),
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": message }),
            ),
            ApiError::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "service_unavailable", "message": message }),
            ),
            ApiError::Conflict { message, job_id } => (
                StatusCode::CONFLICT,
                json!({ "error": "training_already_queued", "message": message, "job_id": job_id }),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal", "message": message }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        warn!("Control surface internal error: {:#}", e);
        ApiError::Internal(e.to_string())
    }
}

fn parse_symbol(symbol: &str) -> Result<String, ApiError> {
    if has_known_venue(symbol) {
        Ok(symbol.to_string())
    } else {
        Err(ApiError::Input(format!(
            "symbol '{}' must carry a .NS or .BO venue suffix",
            symbol
        )))
    }
}

fn parse_timeframe(raw: &str) -> Result<Timeframe, ApiError> {
    Timeframe::from_str(raw).map_err(|e| ApiError::Input(e.to_string()))
}

fn parse_instant(raw: &str, field: &str) -> Result<DateTime<FixedOffset>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map_err(|e| ApiError::Input(format!("{} is not RFC 3339: {}", field, e)))
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    symbol: String,
    timeframe: String,
    from_ts: Option<String>,
    to_ts: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    bypass_cache: Option<bool>,
}

pub async fn history(
    State(app): State<Arc<Application>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = parse_symbol(&query.symbol)?;
    let timeframe = parse_timeframe(&query.timeframe)?;
    let from = query
        .from_ts
        .as_deref()
        .map(|raw| parse_instant(raw, "from_ts"))
        .transpose()?;
    let to = query
        .to_ts
        .as_deref()
        .map(|raw| parse_instant(raw, "to_ts"))
        .transpose()?;
    let limit = query.limit.unwrap_or(0);
    let bypass = query.bypass_cache.unwrap_or(false);

    // Freshen the store through the gateway; a fully exhausted upstream
    // degrades to whatever history is already persisted.
    match app.gateway.fetch_candles(&symbol, timeframe, bypass).await {
        Ok(candles) => {
            if let Err(e) = app
                .candle_repo
                .upsert_batch(&candles, crate::domain::calendar::now_ist())
                .await
            {
                warn!("History: upsert after fetch failed: {:#}", e);
            }
        }
        Err(MarketDataError::ProviderExhausted { .. }) => {
            let stored = app
                .candle_repo
                .range(&symbol, timeframe, from, to, limit)
                .await?;
            if stored.is_empty() {
                return Err(ApiError::Unavailable(format!(
                    "all providers exhausted for {} {} and no stored history",
                    symbol, timeframe
                )));
            }
            return Ok(Json(stored));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }

    let candles = app
        .candle_repo
        .range(&symbol, timeframe, from, to, limit)
        .await?;
    Ok(Json(candles))
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    symbol: String,
    timeframe: String,
}

pub async fn history_latest(
    State(app): State<Arc<Application>>,
    Query(query): Query<LatestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = parse_symbol(&query.symbol)?;
    let timeframe = parse_timeframe(&query.timeframe)?;

    match app.candle_repo.latest(&symbol, timeframe).await? {
        Some(candle) => Ok(Json(candle)),
        None => Err(ApiError::NotFound(format!(
            "no candles stored for {} {}",
            symbol, timeframe
        ))),
    }
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    symbol: String,
    timeframe: String,
    horizon_minutes: Option<u32>,
    selected_bots: Option<Vec<String>>,
}

pub async fn trigger_prediction(
    State(app): State<Arc<Application>>,
    Json(request): Json<TriggerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = parse_symbol(&request.symbol)?;
    let timeframe = parse_timeframe(&request.timeframe)?;
    let horizon = request
        .horizon_minutes
        .unwrap_or(app.config.default_horizon_minutes);
    if horizon == 0 || horizon > 24 * 60 {
        return Err(ApiError::Input(format!(
            "horizon_minutes must be in 1..=1440, got {}",
            horizon
        )));
    }
    if let Some(bots) = &request.selected_bots {
        for bot in bots {
            if app.registry.get(bot).is_none() {
                return Err(ApiError::Input(format!("unknown bot: {}", bot)));
            }
        }
    }

    match app
        .merger
        .merge(&symbol, timeframe, horizon, request.selected_bots.as_deref())
        .await
    {
        Ok(prediction) => Ok(Json(prediction)),
        Err(MergeError::NoHistory { .. }) => Err(ApiError::NotFound(format!(
            "no candle history for {} {}",
            symbol, timeframe
        ))),
        Err(e @ MergeError::AllBotsRejected { .. }) => Err(ApiError::Unavailable(e.to_string())),
        Err(e @ MergeError::DeadlineExceeded { .. }) => Err(ApiError::Unavailable(e.to_string())),
        Err(MergeError::Other(e)) => Err(e.into()),
    }
}

pub async fn prediction_latest(
    State(app): State<Arc<Application>>,
    Query(query): Query<LatestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = parse_symbol(&query.symbol)?;
    let timeframe = parse_timeframe(&query.timeframe)?;

    match app.prediction_repo.latest(&symbol, timeframe).await? {
        Some(prediction) => Ok(Json(prediction)),
        None => Err(ApiError::NotFound(format!(
            "no predictions for {} {}",
            symbol, timeframe
        ))),
    }
}

pub async fn prediction_by_id(
    State(app): State<Arc<Application>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match app.prediction_repo.fetch(id).await? {
        Some(prediction) => Ok(Json(prediction)),
        None => Err(ApiError::NotFound(format!("no prediction with id {}", id))),
    }
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    symbol: String,
    timeframe: String,
    bot_name: String,
    epochs: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    job_id: i64,
}

pub async fn training_enqueue(
    State(app): State<Arc<Application>>,
    Json(request): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = parse_symbol(&request.symbol)?;
    let timeframe = parse_timeframe(&request.timeframe)?;
    let config = match request.epochs {
        Some(epochs) => json!({ "epochs": epochs }),
        None => json!({}),
    };

    match app
        .training_queue
        .enqueue(&symbol, timeframe, &request.bot_name, config)
        .await
    {
        Ok(job_id) => Ok(Json(EnqueueResponse { job_id })),
        Err(TrainingError::AlreadyQueued { job_id }) => Err(ApiError::Conflict {
            message: format!(
                "training already queued for {} {} {}",
                symbol, timeframe, request.bot_name
            ),
            job_id,
        }),
        Err(TrainingError::UnknownBot { name }) => {
            Err(ApiError::Input(format!("unknown bot: {}", name)))
        }
        Err(TrainingError::Other(e)) => Err(e.into()),
    }
}

pub async fn training_status(
    State(app): State<Arc<Application>>,
) -> Result<impl IntoResponse, ApiError> {
    let open = app.training_queue.status().await?;
    Ok(Json(open))
}

// ---------------------------------------------------------------------------
// Health & metrics
// ---------------------------------------------------------------------------

pub async fn health(State(app): State<Arc<Application>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1")
        .fetch_one(&app.database.pool)
        .await
        .is_ok();
    let cache_status = match app.cache.hot_healthy() {
        Some(true) => "ok",
        Some(false) => "degraded",
        None => "disabled",
    };

    let status = if db_ok { "ok" } else { "degraded" };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": status,
            "components": {
                "db": if db_ok { "ok" } else { "down" },
                "cache": cache_status,
                "scheduler": "running",
            }
        })),
    )
}

pub async fn metrics(State(app): State<Arc<Application>>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        app.metrics.render(),
    )
}
