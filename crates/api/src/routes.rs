use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stockpick_core::domain::error::InstrumentError;
use stockpick_core::domain::prediction::Prediction;
use stockpick_core::domain::price::StockInfo;
use stockpick_core::domain::recommendation::RankedRecommendation;
use stockpick_core::health::HealthRecord;
use stockpick_core::pipeline;
use stockpick_core::storage::recommendations::DatedRecommendation;
use stockpick_core::storage::health::{TaskRunCounts, TaskRunRecord};
use stockpick_core::storage::{calendar, health, lock, prices, recommendations, PgStorage};

const DEFAULT_HISTORY_DAYS: i64 = 7;
const MAX_HISTORY_DAYS: i64 = 90;
const STOCK_LIST_LIMIT: usize = 5000;
const DEFAULT_TASK_LIMIT: i64 = 10;
const MAX_TASK_LIMIT: i64 = 200;

type ApiResult<T> = Result<Json<T>, StatusCode>;

pub async fn healthz() -> &'static str {
    "ok"
}

fn require_pool(state: &AppState) -> Result<&PgPool, StatusCode> {
    state.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn current_as_of_date(pool: &PgPool) -> Result<NaiveDate, StatusCode> {
    calendar::load_calendar(pool)
        .await
        .and_then(|cal| cal.resolve_as_of_date(None, Utc::now()))
        .map_err(internal)
}

#[derive(Debug, Serialize)]
pub struct DayRecommendations {
    date: NaiveDate,
    count: usize,
    recommendations: Vec<RankedRecommendation>,
}

pub async fn get_today(State(state): State<AppState>) -> ApiResult<DayRecommendations> {
    let pool = require_pool(&state)?;
    let date = current_as_of_date(pool).await?;
    by_date(pool, date).await
}

pub async fn get_by_date(
    State(state): State<AppState>,
    Path(as_of_date): Path<String>,
) -> ApiResult<DayRecommendations> {
    let pool = require_pool(&state)?;
    let date =
        NaiveDate::parse_from_str(&as_of_date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;
    by_date(pool, date).await
}

async fn by_date(pool: &PgPool, date: NaiveDate) -> ApiResult<DayRecommendations> {
    let recommendations = recommendations::fetch_by_date(pool, date)
        .await
        .map_err(internal)?;
    Ok(Json(DayRecommendations {
        date,
        count: recommendations.len(),
        recommendations,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct History {
    days: i64,
    count: usize,
    history: Vec<DatedRecommendation>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<History> {
    let pool = require_pool(&state)?;
    let days = history_days(q.days)?;
    let end = current_as_of_date(pool).await?;
    let start = end - Duration::days(days - 1);

    let history = recommendations::fetch_history(pool, start, end)
        .await
        .map_err(internal)?;
    Ok(Json(History {
        days,
        count: history.len(),
        history,
    }))
}

fn history_days(days: Option<i64>) -> Result<i64, StatusCode> {
    match days {
        None => Ok(DEFAULT_HISTORY_DAYS),
        Some(d) if (1..=MAX_HISTORY_DAYS).contains(&d) => Ok(d),
        Some(_) => Err(StatusCode::BAD_REQUEST),
    }
}

#[derive(Debug, Serialize)]
pub struct SkippedView {
    ts_code: String,
    kind: &'static str,
    reason: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    status: &'static str,
    as_of_date: NaiveDate,
    count: usize,
    message: String,
    skipped: Vec<SkippedView>,
}

pub async fn generate(State(state): State<AppState>) -> ApiResult<GenerateResponse> {
    let pool = require_pool(&state)?;
    let as_of_date = current_as_of_date(pool).await?;

    let Some(guard) = lock::try_acquire_as_of_date_lock(pool, as_of_date)
        .await
        .map_err(internal)?
    else {
        tracing::warn!(%as_of_date, "generate rejected; as_of_date lock held");
        return Err(StatusCode::CONFLICT);
    };

    let storage = PgStorage::new(pool.clone());
    let res = pipeline::run(&storage, &storage, as_of_date, &state.recommend, false).await;

    if let Err(err) = guard.release().await {
        tracing::warn!(%as_of_date, error = %err, "failed to release as_of_date lock");
    }

    let (batch, report) = res.map_err(internal)?;
    Ok(Json(GenerateResponse {
        status: "success",
        as_of_date,
        count: batch.items.len(),
        message: format!("成功生成 {} 条推荐", batch.items.len()),
        skipped: report
            .skipped
            .into_iter()
            .map(|s| SkippedView {
                ts_code: s.ts_code,
                kind: s.reason.kind(),
                reason: s.reason.to_string(),
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct StockList {
    count: usize,
    stocks: Vec<StockInfo>,
}

pub async fn list_stocks(State(state): State<AppState>) -> ApiResult<StockList> {
    let pool = require_pool(&state)?;
    let stocks = prices::list_stocks(pool, STOCK_LIST_LIMIT)
        .await
        .map_err(internal)?;
    Ok(Json(StockList {
        count: stocks.len(),
        stocks,
    }))
}

pub async fn get_prediction(
    State(state): State<AppState>,
    Path(ts_code): Path<String>,
) -> ApiResult<Prediction> {
    let pool = require_pool(&state)?;
    let instrument = prices::find_instrument(pool, &ts_code)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let as_of_date = current_as_of_date(pool).await?;

    let storage = PgStorage::new(pool.clone());
    let prediction = pipeline::predict_one(
        &storage,
        &instrument,
        as_of_date,
        state.recommend.history_lookback,
    )
    .await
    .map_err(prediction_status)?;
    Ok(Json(prediction))
}

fn prediction_status(e: InstrumentError) -> StatusCode {
    match e {
        InstrumentError::InsufficientData { .. } | InstrumentError::InvalidSeries(_) => {
            tracing::debug!(kind = e.kind(), reason = %e, "no prediction available");
            StatusCode::NOT_FOUND
        }
        InstrumentError::Fetch(_) => internal(anyhow::anyhow!(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecentTasks {
    #[serde(flatten)]
    counts: TaskRunCounts,
    logs: Vec<TaskRunRecord>,
}

pub async fn recent_tasks(
    State(state): State<AppState>,
    Query(q): Query<TaskQuery>,
) -> ApiResult<RecentTasks> {
    let pool = require_pool(&state)?;
    let limit = task_limit(q.limit)?;
    Ok(Json(RecentTasks {
        counts: health::task_run_counts(pool).await.map_err(internal)?,
        logs: health::fetch_recent_task_runs(pool, limit)
            .await
            .map_err(internal)?,
    }))
}

fn task_limit(limit: Option<i64>) -> Result<i64, StatusCode> {
    match limit {
        None => Ok(DEFAULT_TASK_LIMIT),
        Some(n) if (1..=MAX_TASK_LIMIT).contains(&n) => Ok(n),
        Some(_) => Err(StatusCode::BAD_REQUEST),
    }
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    health: Option<HealthRecord>,
    latest_recommendation_date: Option<NaiveDate>,
    latest_generated_at: Option<DateTime<Utc>>,
    latest_trade_date: Option<NaiveDate>,
}

pub async fn system_status(State(state): State<AppState>) -> ApiResult<SystemStatus> {
    let pool = require_pool(&state)?;
    Ok(Json(SystemStatus {
        health: health::latest_health_record(pool).await.map_err(internal)?,
        latest_recommendation_date: recommendations::latest_as_of_date(pool)
            .await
            .map_err(internal)?,
        latest_generated_at: recommendations::latest_generated_at(pool)
            .await
            .map_err(internal)?,
        latest_trade_date: prices::latest_trade_date(pool).await.map_err(internal)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpick_core::config::RecommendOptions;

    fn degraded() -> AppState {
        AppState {
            pool: None,
            recommend: RecommendOptions::default(),
        }
    }

    #[test]
    fn history_days_defaults_and_bounds() {
        assert_eq!(history_days(None), Ok(7));
        assert_eq!(history_days(Some(30)), Ok(30));
        assert_eq!(history_days(Some(0)), Err(StatusCode::BAD_REQUEST));
        assert_eq!(history_days(Some(91)), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn task_limit_defaults_and_bounds() {
        assert_eq!(task_limit(None), Ok(10));
        assert_eq!(task_limit(Some(50)), Ok(50));
        assert_eq!(task_limit(Some(0)), Err(StatusCode::BAD_REQUEST));
        assert_eq!(task_limit(Some(201)), Err(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn recent_tasks_needs_database() {
        let err = recent_tasks(State(degraded()), Query(TaskQuery { limit: Some(5) }))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn recent_tasks_body_flattens_counts_next_to_logs() {
        let body = RecentTasks {
            counts: TaskRunCounts {
                total: 3,
                success: 2,
                failed: 1,
            },
            logs: vec![TaskRunRecord {
                id: uuid::Uuid::nil(),
                task_name: "health_check".to_string(),
                task_type: "health_check".to_string(),
                status: "failed".to_string(),
                message: None,
                error: Some("boom".to_string()),
                started_at: Utc::now(),
                duration_secs: 0.5,
            }],
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["total"], 3);
        assert_eq!(v["success"], 2);
        assert_eq!(v["failed"], 1);
        assert_eq!(v["logs"][0]["task_name"], "health_check");
        assert_eq!(v["logs"][0]["error"], "boom");
    }

    #[test]
    fn insufficient_history_maps_to_not_found() {
        let status = prediction_status(InstrumentError::InsufficientData { have: 5, need: 20 });
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn data_routes_are_unavailable_without_database() {
        let err = get_today(State(degraded())).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);

        let err = generate(State(degraded())).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);

        let err = list_stocks(State(degraded())).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);

        let err = system_status(State(degraded())).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn healthz_is_ok_without_database() {
        assert_eq!(healthz().await, "ok");
    }
}
