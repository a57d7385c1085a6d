use crate::domain::price::{Instrument, PricePoint};
use crate::domain::recommendation::RecommendationBatch;
use crate::pipeline::{PriceHistorySource, RecommendationStore};
use anyhow::Context;
use chrono::NaiveDate;

pub mod calendar;
pub mod health;
pub mod lock;
pub mod prices;
pub mod recommendations;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Postgres-backed price source and recommendation store.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: sqlx::PgPool,
}

impl PgStorage {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl PriceHistorySource for PgStorage {
    async fn list_instruments(&self, limit: usize) -> anyhow::Result<Vec<Instrument>> {
        prices::list_instruments(&self.pool, limit).await
    }

    async fn load_history(
        &self,
        ts_code: &str,
        as_of_date: NaiveDate,
        lookback: usize,
    ) -> anyhow::Result<Vec<PricePoint>> {
        prices::load_history(&self.pool, ts_code, as_of_date, lookback).await
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgStorage {
    async fn replace_batch(&self, batch: &RecommendationBatch) -> anyhow::Result<u64> {
        recommendations::replace_batch(&self.pool, batch).await
    }
}
