use crate::time::cn_market::{CalendarDay, TradingCalendar};
use anyhow::Context;
use chrono::NaiveDate;

pub async fn upsert_trade_calendar(pool: &sqlx::PgPool, days: &[CalendarDay]) -> anyhow::Result<u64> {
    if days.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut affected: u64 = 0;

    // One row per calendar day; a year fits in a few chunks.
    for chunk in days.chunks(500) {
        let mut qb = sqlx::QueryBuilder::new("INSERT INTO trade_calendar (cal_date, is_open) ");
        qb.push_values(chunk, |mut b, day| {
            b.push_bind(day.date).push_bind(day.is_open);
        });
        qb.push(" ON CONFLICT (cal_date) DO UPDATE SET is_open = EXCLUDED.is_open, updated_at = now()");

        let res = qb
            .build()
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("batch upsert trade_calendar failed")?;
        affected += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

pub async fn fetch_trade_calendar(pool: &sqlx::PgPool) -> anyhow::Result<Vec<CalendarDay>> {
    let rows = sqlx::query_as::<_, (NaiveDate, bool)>(
        "SELECT cal_date, is_open FROM trade_calendar ORDER BY cal_date ASC",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .context("select trade_calendar failed")?;

    Ok(rows
        .into_iter()
        .map(|(date, is_open)| CalendarDay { date, is_open })
        .collect())
}

/// Builtin closures overlaid with the stored exchange calendar and `CN_MARKET_HOLIDAYS`.
pub async fn load_calendar(pool: &sqlx::PgPool) -> anyhow::Result<TradingCalendar> {
    let days = fetch_trade_calendar(pool).await?;
    tracing::debug!(stored_days = days.len(), "trading calendar loaded");
    Ok(TradingCalendar::load(&days))
}
