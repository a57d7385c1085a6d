use crate::domain::recommendation::{
    join_reasons, split_reasons, target_price, RankedRecommendation, RecommendationBatch,
};
use crate::storage::lock;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// A stored recommendation together with the date it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct DatedRecommendation {
    pub as_of_date: NaiveDate,
    #[serde(flatten)]
    pub item: RankedRecommendation,
}

type ItemRow = (
    NaiveDate,
    i32,
    String,
    String,
    f64,
    Option<f64>,
    f64,
    String,
);

const SELECT_ITEMS: &str = "SELECT as_of_date, rank, ts_code, name, predicted_return, confidence, current_price, reasons \
                            FROM recommendations";

/// Deletes the stored batch for the date and inserts the new one in a single transaction.
///
/// Concurrent writers for the same date queue on a transaction-scoped advisory lock. Any failure
/// rolls back the delete as well, so the previous batch stays intact.
pub async fn replace_batch(pool: &sqlx::PgPool, batch: &RecommendationBatch) -> anyhow::Result<u64> {
    batch.validate()?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    lock::lock_as_of_date_in_tx(&mut tx, batch.as_of_date).await?;

    let deleted = sqlx::query("DELETE FROM recommendations WHERE as_of_date = $1")
        .persistent(false)
        .bind(batch.as_of_date)
        .execute(&mut *tx)
        .await
        .context("delete recommendations failed")?
        .rows_affected();

    for item in &batch.items {
        insert_item(&mut tx, batch.as_of_date, batch.generated_at, item).await?;
    }

    tx.commit().await.context("commit transaction failed")?;

    tracing::debug!(
        as_of_date = %batch.as_of_date,
        deleted,
        inserted = batch.items.len(),
        "recommendations replaced"
    );
    Ok(batch.items.len() as u64)
}

async fn insert_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    as_of_date: NaiveDate,
    generated_at: DateTime<Utc>,
    item: &RankedRecommendation,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO recommendations \
         (as_of_date, rank, ts_code, name, predicted_return, confidence, current_price, reasons, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .persistent(false)
    .bind(as_of_date)
    .bind(item.rank)
    .bind(&item.ts_code)
    .bind(&item.name)
    .bind(item.predicted_return)
    .bind(item.confidence)
    .bind(item.current_price)
    .bind(join_reasons(&item.reasons))
    .bind(generated_at)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert recommendation failed (ts_code={})", item.ts_code))?;

    Ok(())
}

pub async fn fetch_by_date(
    pool: &sqlx::PgPool,
    as_of_date: NaiveDate,
) -> anyhow::Result<Vec<RankedRecommendation>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        "{SELECT_ITEMS} WHERE as_of_date = $1 ORDER BY rank ASC"
    ))
    .persistent(false)
    .bind(as_of_date)
    .fetch_all(pool)
    .await
    .context("select recommendations failed")?;

    Ok(rows.into_iter().map(|row| row_to_dated(row).item).collect())
}

/// Rows dated within `[start, end]`, newest date first, then by rank.
pub async fn fetch_history(
    pool: &sqlx::PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<DatedRecommendation>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        "{SELECT_ITEMS} WHERE as_of_date >= $1 AND as_of_date <= $2 ORDER BY as_of_date DESC, rank ASC"
    ))
    .persistent(false)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("select recommendation history failed")?;

    Ok(rows.into_iter().map(row_to_dated).collect())
}

pub async fn latest_as_of_date(pool: &sqlx::PgPool) -> anyhow::Result<Option<NaiveDate>> {
    let row: (Option<NaiveDate>,) = sqlx::query_as("SELECT max(as_of_date) FROM recommendations")
        .persistent(false)
        .fetch_one(pool)
        .await
        .context("select latest recommendation date failed")?;
    Ok(row.0)
}

pub async fn latest_generated_at(pool: &sqlx::PgPool) -> anyhow::Result<Option<DateTime<Utc>>> {
    let row: (Option<DateTime<Utc>>,) = sqlx::query_as("SELECT max(created_at) FROM recommendations")
        .persistent(false)
        .fetch_one(pool)
        .await
        .context("select latest recommendation time failed")?;
    Ok(row.0)
}

pub async fn count_for_date(pool: &sqlx::PgPool, as_of_date: NaiveDate) -> anyhow::Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM recommendations WHERE as_of_date = $1")
        .persistent(false)
        .bind(as_of_date)
        .fetch_one(pool)
        .await
        .context("count recommendations failed")?;
    Ok(row.0)
}

fn row_to_dated(row: ItemRow) -> DatedRecommendation {
    let (as_of_date, rank, ts_code, name, predicted_return, confidence, current_price, reasons) = row;
    DatedRecommendation {
        as_of_date,
        item: RankedRecommendation {
            rank,
            ts_code,
            name,
            predicted_return,
            confidence,
            current_price,
            target_price: target_price(current_price, predicted_return),
            reasons: split_reasons(&reasons),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_row_recomputes_target_and_splits_reasons() {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let row: ItemRow = (
            as_of,
            1,
            "600000.SH".to_string(),
            "浦发银行".to_string(),
            3.5,
            Some(0.7),
            12.0,
            "预测收益率: 3.50%\n当前价格: ¥12.00".to_string(),
        );
        let dated = row_to_dated(row);
        assert_eq!(dated.as_of_date, as_of);
        assert_eq!(dated.item.reasons.len(), 2);
        assert!((dated.item.target_price - 12.42).abs() < 1e-9);
    }
}
