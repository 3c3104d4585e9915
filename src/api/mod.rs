use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::ingest_stats::{IngestSnapshot, INGEST_STATS};
use crate::models::{BlockRecord, PeriodCount, TxRecord};
use crate::storage::{self, DbPool, StoreError};

const DEFAULT_DAYS: i64 = 30;
const MAX_DAYS: i64 = 366;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct DaysResponse {
    days: Vec<PeriodCount>,
}

#[derive(Serialize)]
struct MonthsResponse {
    months: Vec<PeriodCount>,
}

#[derive(Serialize)]
struct BlocksResponse {
    blocks: Vec<BlockRecord>,
}

#[derive(Deserialize)]
struct DaysParams {
    limit: Option<i64>,
}

pub enum ApiError {
    NotFound,
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "not found" })),
            )
                .into_response(),
            ApiError::Store(err) => {
                tracing::warn!("api query failed: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn ingest_stats() -> Json<IngestSnapshot> {
    Json(INGEST_STATS.snapshot())
}

async fn txs_per_day(
    State(state): State<AppState>,
    Query(params): Query<DaysParams>,
) -> Result<Json<DaysResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_DAYS).clamp(1, MAX_DAYS);
    let days = storage::get_txs_per_day(&state.pool, limit).await?;
    Ok(Json(DaysResponse { days }))
}

async fn txs_per_month(State(state): State<AppState>) -> Result<Json<MonthsResponse>, ApiError> {
    let months = storage::get_txs_per_month(&state.pool).await?;
    Ok(Json(MonthsResponse { months }))
}

async fn tx_by_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<TxRecord>, ApiError> {
    let tx = storage::get_transaction(&state.pool, &hash.to_lowercase()).await?;
    tx.map(Json).ok_or(ApiError::NotFound)
}

async fn blocks_by_number(
    State(state): State<AppState>,
    Path(number): Path<u64>,
) -> Result<Json<BlocksResponse>, ApiError> {
    let blocks = storage::get_blocks_by_number(&state.pool, number).await?;
    if blocks.is_empty() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(BlocksResponse { blocks }))
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats/ingest", get(ingest_stats))
        .route("/stats/txs-per-day", get(txs_per_day))
        .route("/stats/txs-per-month", get(txs_per_month))
        .route("/tx/:hash", get(tx_by_hash))
        .route("/blocks/:number", get(blocks_by_number))
        .with_state(state)
}

pub async fn run_http_server(addr: &str, state: AppState) -> Result<()> {
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
