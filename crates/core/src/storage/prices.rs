use crate::domain::price::{Instrument, PricePoint, StockInfo};
use anyhow::Context;
use chrono::NaiveDate;

const DEFAULT_UPSERT_BATCH: usize = 200;

fn upsert_batch_size() -> anyhow::Result<usize> {
    let chunk_size = crate::config::env_parse::<usize>("STOCK_PRICES_UPSERT_BATCH")?
        .unwrap_or(DEFAULT_UPSERT_BATCH);
    anyhow::ensure!(chunk_size >= 1, "STOCK_PRICES_UPSERT_BATCH must be >= 1");
    Ok(chunk_size)
}

pub async fn upsert_stocks(pool: &sqlx::PgPool, stocks: &[StockInfo]) -> anyhow::Result<u64> {
    if stocks.is_empty() {
        return Ok(0);
    }

    let chunk_size = upsert_batch_size()?;
    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    for chunk in stocks.chunks(chunk_size) {
        let mut qb = sqlx::QueryBuilder::new("INSERT INTO stocks (ts_code, name, industry, market) ");
        qb.push_values(chunk, |mut b, stock| {
            b.push_bind(stock.ts_code.trim())
                .push_bind(stock.name.trim())
                .push_bind(stock.industry.as_deref())
                .push_bind(stock.market.as_deref());
        });
        qb.push(
            " ON CONFLICT (ts_code) DO UPDATE \
               SET name = EXCLUDED.name, industry = EXCLUDED.industry, market = EXCLUDED.market, \
                   updated_at = now()",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert stocks failed")?;
        affected += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

/// Inserts or overwrites daily bars. One row per (ts_code, trade_date).
pub async fn upsert_prices(
    pool: &sqlx::PgPool,
    ts_code: &str,
    points: &[PricePoint],
) -> anyhow::Result<u64> {
    if points.is_empty() {
        return Ok(0);
    }

    let chunk_size = upsert_batch_size()?;
    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    let mut batch_idx: usize = 0;
    for chunk in points.chunks(chunk_size) {
        batch_idx += 1;
        let t0 = std::time::Instant::now();
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO stock_prices (ts_code, trade_date, open, high, low, close, vol, amount, pct_chg) ",
        );
        qb.push_values(chunk, |mut b, p| {
            b.push_bind(ts_code)
                .push_bind(p.date)
                .push_bind(p.open)
                .push_bind(p.high)
                .push_bind(p.low)
                .push_bind(p.close)
                .push_bind(p.volume)
                .push_bind(p.amount)
                .push_bind(p.percent_change);
        });
        qb.push(
            " ON CONFLICT (ts_code, trade_date) DO UPDATE \
               SET open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                   close = EXCLUDED.close, vol = EXCLUDED.vol, amount = EXCLUDED.amount, \
                   pct_chg = EXCLUDED.pct_chg",
        );

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("batch upsert stock_prices failed for {ts_code}"))?;
        affected += res.rows_affected();

        tracing::debug!(
            ts_code,
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "stock_prices batch upsert"
        );
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

pub async fn list_instruments(pool: &sqlx::PgPool, limit: usize) -> anyhow::Result<Vec<Instrument>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT ts_code, name FROM stocks ORDER BY ts_code ASC LIMIT $1",
    )
    .persistent(false)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .context("select stocks failed")?;

    Ok(rows
        .into_iter()
        .map(|(ts_code, name)| Instrument { ts_code, name })
        .collect())
}

pub async fn list_stocks(pool: &sqlx::PgPool, limit: usize) -> anyhow::Result<Vec<StockInfo>> {
    let rows = sqlx::query_as::<_, (String, String, Option<String>, Option<String>)>(
        "SELECT ts_code, name, industry, market FROM stocks ORDER BY ts_code ASC LIMIT $1",
    )
    .persistent(false)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .context("select stocks failed")?;

    Ok(rows
        .into_iter()
        .map(|(ts_code, name, industry, market)| StockInfo {
            ts_code,
            name,
            industry,
            market,
        })
        .collect())
}

pub async fn find_instrument(pool: &sqlx::PgPool, ts_code: &str) -> anyhow::Result<Option<Instrument>> {
    let row = sqlx::query_as::<_, (String, String)>("SELECT ts_code, name FROM stocks WHERE ts_code = $1")
        .persistent(false)
        .bind(ts_code)
        .fetch_optional(pool)
        .await
        .context("select stock failed")?;

    Ok(row.map(|(ts_code, name)| Instrument { ts_code, name }))
}

/// Most recent `lookback` bars on or before `as_of_date`, newest first.
pub async fn load_history(
    pool: &sqlx::PgPool,
    ts_code: &str,
    as_of_date: NaiveDate,
    lookback: usize,
) -> anyhow::Result<Vec<PricePoint>> {
    let rows = sqlx::query_as::<_, (NaiveDate, f64, f64, f64, f64, f64, f64, f64)>(
        "SELECT trade_date, open, high, low, close, vol, amount, pct_chg \
         FROM stock_prices \
         WHERE ts_code = $1 AND trade_date <= $2 \
         ORDER BY trade_date DESC \
         LIMIT $3",
    )
    .persistent(false)
    .bind(ts_code)
    .bind(as_of_date)
    .bind(lookback as i64)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select stock_prices failed for {ts_code}"))?;

    Ok(rows
        .into_iter()
        .map(
            |(date, open, high, low, close, volume, amount, percent_change)| PricePoint {
                date,
                open,
                high,
                low,
                close,
                volume,
                amount,
                percent_change,
            },
        )
        .collect())
}

pub async fn latest_trade_date(pool: &sqlx::PgPool) -> anyhow::Result<Option<NaiveDate>> {
    let row: (Option<NaiveDate>,) = sqlx::query_as("SELECT max(trade_date) FROM stock_prices")
        .persistent(false)
        .fetch_one(pool)
        .await
        .context("select latest trade_date failed")?;
    Ok(row.0)
}
