use crate::analysis::features::compute_features;
use crate::analysis::predictor::{predict, ScoringContext};
use crate::analysis::ranking::{rank, RankingOptions};
use crate::config::RecommendOptions;
use crate::domain::error::InstrumentError;
use crate::domain::prediction::Prediction;
use crate::domain::price::{Instrument, PricePoint, PriceSeries};
use crate::domain::recommendation::RecommendationBatch;
use anyhow::Context;
use chrono::{NaiveDate, Utc};

#[async_trait::async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn list_instruments(&self, limit: usize) -> anyhow::Result<Vec<Instrument>>;

    /// The most recent `lookback` points dated on or before `as_of_date`, in any order.
    async fn load_history(
        &self,
        ts_code: &str,
        as_of_date: NaiveDate,
        lookback: usize,
    ) -> anyhow::Result<Vec<PricePoint>>;
}

#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Replaces every row stored for `batch.as_of_date`. All or nothing.
    async fn replace_batch(&self, batch: &RecommendationBatch) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone)]
pub struct SkippedInstrument {
    pub ts_code: String,
    pub reason: InstrumentError,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub as_of_date: NaiveDate,
    pub considered: usize,
    pub scored: usize,
    pub skipped: Vec<SkippedInstrument>,
    pub recommended: usize,
    pub persisted: bool,
}

/// Scores every instrument in the universe and ranks the result. Nothing is written.
pub async fn build_batch(
    source: &dyn PriceHistorySource,
    as_of_date: NaiveDate,
    opts: &RecommendOptions,
) -> anyhow::Result<(RecommendationBatch, RunReport)> {
    opts.validate()?;

    let instruments = source
        .list_instruments(opts.universe_limit)
        .await
        .context("failed to list instruments")?;

    let mut ctx = ScoringContext::new();
    let mut skipped = Vec::new();

    for instrument in &instruments {
        match load_series(source, &instrument.ts_code, as_of_date, opts.history_lookback)
            .await
            .and_then(|series| compute_features(&series))
        {
            Ok(snapshot) => ctx.insert(instrument.clone(), snapshot),
            Err(reason) => {
                tracing::debug!(
                    %as_of_date,
                    ts_code = %instrument.ts_code,
                    kind = reason.kind(),
                    reason = %reason,
                    "instrument skipped"
                );
                skipped.push(SkippedInstrument {
                    ts_code: instrument.ts_code.clone(),
                    reason,
                });
            }
        }
    }

    let predictions = ctx.predictions();
    let items = rank(&predictions, &RankingOptions::from(opts));

    let batch = RecommendationBatch {
        as_of_date,
        generated_at: Utc::now(),
        items,
    };
    batch.validate()?;

    let report = RunReport {
        as_of_date,
        considered: instruments.len(),
        scored: ctx.len(),
        skipped,
        recommended: batch.items.len(),
        persisted: false,
    };

    tracing::info!(
        %as_of_date,
        considered = report.considered,
        scored = report.scored,
        skipped = report.skipped.len(),
        recommended = report.recommended,
        "recommendation batch built"
    );

    Ok((batch, report))
}

/// Builds a batch and, unless `dry_run`, replaces the stored batch for `as_of_date`.
pub async fn run(
    source: &dyn PriceHistorySource,
    store: &dyn RecommendationStore,
    as_of_date: NaiveDate,
    opts: &RecommendOptions,
    dry_run: bool,
) -> anyhow::Result<(RecommendationBatch, RunReport)> {
    let (batch, mut report) = build_batch(source, as_of_date, opts).await?;

    if dry_run {
        tracing::info!(%as_of_date, dry_run = true, "skipping recommendation write");
        return Ok((batch, report));
    }

    let written = store
        .replace_batch(&batch)
        .await
        .with_context(|| format!("failed to replace recommendations for {as_of_date}"))?;
    report.persisted = true;

    tracing::info!(%as_of_date, rows = written, "recommendation batch replaced");
    Ok((batch, report))
}

/// On-demand prediction for one instrument. `Err` carries why no prediction is available.
pub async fn predict_one(
    source: &dyn PriceHistorySource,
    instrument: &Instrument,
    as_of_date: NaiveDate,
    lookback: usize,
) -> Result<Prediction, InstrumentError> {
    let series = load_series(source, &instrument.ts_code, as_of_date, lookback).await?;
    let snapshot = compute_features(&series)?;
    Ok(predict(instrument, &snapshot))
}

async fn load_series(
    source: &dyn PriceHistorySource,
    ts_code: &str,
    as_of_date: NaiveDate,
    lookback: usize,
) -> Result<PriceSeries, InstrumentError> {
    let points = source
        .load_history(ts_code, as_of_date, lookback)
        .await
        .map_err(|e| InstrumentError::Fetch(format!("{e:#}")))?;
    PriceSeries::new(ts_code, points)
}
