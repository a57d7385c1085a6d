use crate::ingest::{ingest_market_data, IngestOptions, IngestSummary};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::time::Instant;
use stockpick_core::config::{RecommendOptions, Settings};
use stockpick_core::health::{evaluate_health, HealthRecord};
use stockpick_core::ingest::tushare::TushareClient;
use stockpick_core::pipeline::{self, RunReport};
use stockpick_core::ingest::provider::MarketDataProvider;
use stockpick_core::storage::{self, calendar, health, lock, recommendations, PgStorage};
use stockpick_core::time::cn_market::{self, TradingCalendar};

/// Everything a task needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub settings: Settings,
    pub storage: PgStorage,
    pub recommend: RecommendOptions,
}

impl TaskContext {
    pub fn pool(&self) -> &sqlx::PgPool {
        self.storage.pool()
    }
}

pub async fn ingest(ctx: &TaskContext, as_of_date: NaiveDate) -> anyhow::Result<IngestSummary> {
    let provider = TushareClient::from_settings(&ctx.settings)?;
    let opts = IngestOptions::from_env(ctx.recommend.universe_limit)?;
    ingest_market_data(ctx.pool(), &provider, as_of_date, &opts).await
}

/// Pulls the SSE calendar for the previous and current year into `trade_calendar`.
pub async fn sync_trade_calendar(ctx: &TaskContext, around: NaiveDate) -> anyhow::Result<u64> {
    let provider = TushareClient::from_settings(&ctx.settings)?;
    let (start, end) = cn_market::sync_window(around);
    let days = provider.fetch_trade_calendar(start, end).await?;
    let written = calendar::upsert_trade_calendar(ctx.pool(), &days).await?;
    tracing::info!(%start, %end, days = days.len(), "trade calendar synced");
    Ok(written)
}

/// Best-effort calendar refresh. Without a token, or on failure, the stored and builtin
/// calendars are used as they are.
pub async fn refresh_trade_calendar(ctx: &TaskContext) {
    if ctx.settings.tushare_token.is_none() {
        return;
    }
    let today = match cn_market::today_cst(Utc::now()) {
        Ok(d) => d,
        Err(err) => {
            tracing::warn!(error = %err, "cannot compute CST date for calendar sync");
            return;
        }
    };
    if let Err(err) = sync_trade_calendar(ctx, today).await {
        tracing::warn!(error = %err, "trade calendar sync failed; using stored calendar");
    }
}

pub async fn trading_calendar(ctx: &TaskContext) -> anyhow::Result<TradingCalendar> {
    calendar::load_calendar(ctx.pool()).await
}

pub async fn resolve_as_of_date(ctx: &TaskContext, arg: Option<&str>) -> anyhow::Result<NaiveDate> {
    let cal = trading_calendar(ctx).await?;
    let as_of_date = cal.resolve_as_of_date(arg, Utc::now())?;
    if !cal.is_trading_day(as_of_date) {
        tracing::warn!(%as_of_date, "as_of_date is not a CN trading day; using the last bars on or before it");
    }
    Ok(as_of_date)
}

/// Runs the pipeline while holding the per-date lock. `None` when another run holds it.
pub async fn recommend(
    ctx: &TaskContext,
    as_of_date: NaiveDate,
    dry_run: bool,
) -> anyhow::Result<Option<RunReport>> {
    let Some(guard) = lock::try_acquire_as_of_date_lock(ctx.pool(), as_of_date).await? else {
        tracing::warn!(%as_of_date, "as_of_date lock not acquired; another run in progress");
        return Ok(None);
    };

    let res = pipeline::run(&ctx.storage, &ctx.storage, as_of_date, &ctx.recommend, dry_run).await;

    if let Err(err) = guard.release().await {
        tracing::warn!(%as_of_date, error = %err, "failed to release as_of_date lock");
    }

    let (_, report) = res?;
    Ok(Some(report))
}

pub async fn health_check(ctx: &TaskContext) -> anyhow::Result<HealthRecord> {
    let now = Utc::now();
    let as_of_date = trading_calendar(ctx).await?.resolve_as_of_date(None, now)?;

    let latest = health::latest_health_record(ctx.pool()).await?;
    let count = recommendations::count_for_date(ctx.pool(), as_of_date).await?;
    let record = evaluate_health(latest.as_ref(), count, now);
    health::insert_health_record(ctx.pool(), &record).await?;

    tracing::info!(
        status = record.status.as_str(),
        recommendations = count,
        %as_of_date,
        message = record.error_message.as_deref().unwrap_or(""),
        "health check finished"
    );
    Ok(record)
}

/// Ingest, then recommend, then stamp the health table. A failure is stamped as an `error` record.
pub async fn daily_update(ctx: &TaskContext, as_of_date: NaiveDate) -> anyhow::Result<()> {
    let res = daily_update_steps(ctx, as_of_date).await;
    if let Err(err) = &res {
        let latest = health::latest_health_record(ctx.pool()).await.ok().flatten();
        let record = HealthRecord::failure(Utc::now(), latest.as_ref(), format!("{err:#}"));
        if let Err(log_err) = health::insert_health_record(ctx.pool(), &record).await {
            tracing::warn!(%as_of_date, error = %log_err, "failed to record daily update failure");
        }
    }
    res
}

async fn daily_update_steps(ctx: &TaskContext, as_of_date: NaiveDate) -> anyhow::Result<()> {
    let summary = ingest(ctx, as_of_date).await?;
    tracing::info!(%as_of_date, rows = summary.rows, failures = summary.failures, "ingest step done");

    let report = recommend(ctx, as_of_date, false)
        .await?
        .context("recommendation step skipped: as_of_date lock held by another run")?;
    tracing::info!(%as_of_date, recommended = report.recommended, "recommend step done");

    health::insert_health_record(ctx.pool(), &HealthRecord::after_update(Utc::now())).await?;
    Ok(())
}

/// Awaits `fut` and records its outcome in `task_runs`. The task error is returned unchanged.
pub async fn recorded<T, F>(
    pool: &sqlx::PgPool,
    task_name: &str,
    task_type: &str,
    fut: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started_at = Utc::now();
    let t0 = Instant::now();
    let res = fut.await;
    let duration_secs = t0.elapsed().as_secs_f64();

    let error = res.as_ref().err().map(|e| format!("{e:#}"));
    let run = health::TaskRun {
        task_name,
        task_type,
        status: if res.is_ok() { "success" } else { "failed" },
        message: None,
        error: error.as_deref(),
        started_at,
        duration_secs,
    };
    if let Err(log_err) = health::record_task_run(pool, &run).await {
        tracing::warn!(task_name, error = %log_err, "failed to record task run");
    }

    res
}

pub async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    storage::migrate(&pool).await?;
    Ok(pool)
}
