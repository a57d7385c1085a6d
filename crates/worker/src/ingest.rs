use anyhow::Context;
use chrono::{Duration, NaiveDate};
use std::time::Instant;
use stockpick_core::config::env_parse;
use stockpick_core::ingest::provider::MarketDataProvider;
use stockpick_core::storage::prices;

const DEFAULT_LOOKBACK_DAYS: i64 = 30;
const DEFAULT_REQ_DELAY_MS: u64 = 500;
const DEFAULT_PROGRESS_EVERY: usize = 20;
const MAX_LOGGED_FAILURES: usize = 10;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Calendar days of bars refreshed per instrument.
    pub lookback_days: i64,
    /// Pause between provider requests (rate limit).
    pub req_delay: std::time::Duration,
    pub max_instruments: usize,
    pub progress_every: usize,
}

impl IngestOptions {
    pub fn from_env(max_instruments: usize) -> anyhow::Result<Self> {
        let lookback_days = env_parse::<i64>("INGEST_LOOKBACK_DAYS")?.unwrap_or(DEFAULT_LOOKBACK_DAYS);
        anyhow::ensure!(lookback_days >= 1, "INGEST_LOOKBACK_DAYS must be >= 1");

        Ok(Self {
            lookback_days,
            req_delay: std::time::Duration::from_millis(
                env_parse::<u64>("TUSHARE_REQ_DELAY_MS")?.unwrap_or(DEFAULT_REQ_DELAY_MS),
            ),
            max_instruments,
            progress_every: env_parse::<usize>("INGEST_PROGRESS_EVERY")?
                .unwrap_or(DEFAULT_PROGRESS_EVERY),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub stocks: u64,
    pub instruments: usize,
    pub rows: u64,
    pub failures: usize,
}

/// Refreshes the stock list, then the recent daily bars of the tracked instruments.
///
/// A listing failure aborts the run. A failure for one instrument is logged and skipped.
pub async fn ingest_market_data(
    pool: &sqlx::PgPool,
    provider: &dyn MarketDataProvider,
    as_of_date: NaiveDate,
    opts: &IngestOptions,
) -> anyhow::Result<IngestSummary> {
    let t0 = Instant::now();
    let mut summary = IngestSummary::default();

    let stocks = provider
        .fetch_stock_list()
        .await
        .context("failed to fetch stock list")?;
    summary.stocks = prices::upsert_stocks(pool, &stocks).await?;
    tracing::info!(provider = provider.provider_name(), stocks = stocks.len(), "stock list updated");

    let instruments = prices::list_instruments(pool, opts.max_instruments).await?;
    summary.instruments = instruments.len();
    let start = as_of_date - Duration::days(opts.lookback_days);
    let total = instruments.len();

    for (idx, instrument) in instruments.iter().enumerate() {
        if idx != 0 {
            tokio::time::sleep(opts.req_delay).await;
        }

        let res = async {
            let points = provider
                .fetch_daily(&instrument.ts_code, start, as_of_date)
                .await?;
            prices::upsert_prices(pool, &instrument.ts_code, &points).await
        }
        .await;

        match res {
            Ok(rows) => summary.rows += rows,
            Err(err) => {
                summary.failures += 1;
                if summary.failures <= MAX_LOGGED_FAILURES {
                    tracing::warn!(
                        idx,
                        ts_code = %instrument.ts_code,
                        name = %instrument.name,
                        failure_count = summary.failures,
                        error = %err,
                        "daily bar fetch failed; skipping stock"
                    );
                }
            }
        }

        if opts.progress_every != 0 {
            let n = idx + 1;
            if n == 1 || n == total || (n % opts.progress_every == 0) {
                tracing::info!(
                    processed = n,
                    total,
                    rows = summary.rows,
                    failures = summary.failures,
                    %as_of_date,
                    "ingest progress"
                );
            }
        }
    }

    tracing::info!(
        %as_of_date,
        instruments = summary.instruments,
        rows = summary.rows,
        failures = summary.failures,
        elapsed_ms = t0.elapsed().as_millis(),
        "market data ingest finished"
    );
    Ok(summary)
}
