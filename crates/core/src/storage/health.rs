use crate::health::{HealthRecord, HealthStatus};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub async fn insert_health_record(pool: &sqlx::PgPool, record: &HealthRecord) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO system_health (check_time, status, data_update_time, last_prediction_time, error_message) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .persistent(false)
    .bind(record.check_time)
    .bind(record.status.as_str())
    .bind(record.data_update_time)
    .bind(record.last_prediction_time)
    .bind(record.error_message.as_deref())
    .execute(pool)
    .await
    .context("insert system_health failed")?;
    Ok(())
}

pub async fn latest_health_record(pool: &sqlx::PgPool) -> anyhow::Result<Option<HealthRecord>> {
    let row = sqlx::query_as::<
        _,
        (
            DateTime<Utc>,
            String,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            Option<String>,
        ),
    >(
        "SELECT check_time, status, data_update_time, last_prediction_time, error_message \
         FROM system_health \
         ORDER BY check_time DESC \
         LIMIT 1",
    )
    .persistent(false)
    .fetch_optional(pool)
    .await
    .context("select system_health failed")?;

    let Some((check_time, status, data_update_time, last_prediction_time, error_message)) = row else {
        return Ok(None);
    };

    Ok(Some(HealthRecord {
        check_time,
        status: HealthStatus::parse(&status)
            .with_context(|| format!("unknown system_health status in DB: {status}"))?,
        data_update_time,
        last_prediction_time,
        error_message,
    }))
}

/// One execution of a scheduled or CLI task.
#[derive(Debug, Clone)]
pub struct TaskRun<'a> {
    pub task_name: &'a str,
    pub task_type: &'a str,
    pub status: &'a str,
    pub message: Option<&'a str>,
    pub error: Option<&'a str>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

pub async fn record_task_run(pool: &sqlx::PgPool, run: &TaskRun<'_>) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO task_runs (id, task_name, task_type, status, message, error, started_at, duration_secs) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .persistent(false)
    .bind(id)
    .bind(run.task_name)
    .bind(run.task_type)
    .bind(run.status)
    .bind(run.message)
    .bind(run.error)
    .bind(run.started_at)
    .bind(run.duration_secs)
    .execute(pool)
    .await
    .context("insert task_runs failed")?;

    Ok(id)
}

/// A stored `task_runs` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRunRecord {
    pub id: Uuid,
    pub task_name: String,
    pub task_type: String,
    pub status: String,
    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskRunCounts {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
}

/// Newest first.
pub async fn fetch_recent_task_runs(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<Vec<TaskRunRecord>> {
    let rows = sqlx::query_as::<
        _,
        (
            Uuid,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            DateTime<Utc>,
            f64,
        ),
    >(
        "SELECT id, task_name, task_type, status, message, error, started_at, duration_secs \
         FROM task_runs \
         ORDER BY started_at DESC \
         LIMIT $1",
    )
    .persistent(false)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("select task_runs failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(id, task_name, task_type, status, message, error, started_at, duration_secs)| TaskRunRecord {
                id,
                task_name,
                task_type,
                status,
                message,
                error,
                started_at,
                duration_secs,
            },
        )
        .collect())
}

pub async fn task_run_counts(pool: &sqlx::PgPool) -> anyhow::Result<TaskRunCounts> {
    let (total, success, failed): (i64, i64, i64) = sqlx::query_as(
        "SELECT count(*), \
                count(*) FILTER (WHERE status = 'success'), \
                count(*) FILTER (WHERE status = 'failed') \
         FROM task_runs",
    )
    .persistent(false)
    .fetch_one(pool)
    .await
    .context("count task_runs failed")?;

    Ok(TaskRunCounts {
        total,
        success,
        failed,
    })
}
