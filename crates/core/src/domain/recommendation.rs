use anyhow::{bail, ensure};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Separator used when reasons are stored as a single text column.
pub const REASONS_DELIMITER: char = '\n';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationBatch {
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<RankedRecommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecommendation {
    pub rank: i32,
    pub ts_code: String,
    pub name: String,
    pub predicted_return: f64,
    pub confidence: Option<f64>,
    pub current_price: f64,
    pub target_price: f64,
    pub reasons: Vec<String>,
}

pub fn target_price(current_price: f64, predicted_return: f64) -> f64 {
    current_price * (1.0 + predicted_return / 100.0)
}

pub fn join_reasons(reasons: &[String]) -> String {
    reasons.join(&REASONS_DELIMITER.to_string())
}

pub fn split_reasons(text: &str) -> Vec<String> {
    text.split(REASONS_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl RecommendationBatch {
    /// Checks the shape persisted rows must have: ranks dense from 1, one row per instrument.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen_codes = BTreeSet::<&str>::new();
        for (idx, item) in self.items.iter().enumerate() {
            let expected = (idx + 1) as i32;
            if item.rank != expected {
                bail!(
                    "ranks must be dense starting at 1: position {} has rank {}",
                    idx + 1,
                    item.rank
                );
            }

            let ts_code = item.ts_code.trim();
            ensure!(!ts_code.is_empty(), "ts_code must be non-empty");
            ensure!(
                seen_codes.insert(ts_code),
                "duplicate ts_code in batch: {ts_code}"
            );
            ensure!(
                item.predicted_return.is_finite() && item.current_price.is_finite(),
                "non-finite numbers for {ts_code}"
            );
            for reason in &item.reasons {
                ensure!(
                    !reason.contains(REASONS_DELIMITER),
                    "reason for {ts_code} contains the storage delimiter"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(rank: i32, ts_code: &str) -> RankedRecommendation {
        RankedRecommendation {
            rank,
            ts_code: ts_code.to_string(),
            name: format!("Name {ts_code}"),
            predicted_return: 1.5,
            confidence: Some(0.6),
            current_price: 10.0,
            target_price: target_price(10.0, 1.5),
            reasons: vec!["a".to_string(), "b".to_string()],
        }
    }

    fn batch(items: Vec<RankedRecommendation>) -> RecommendationBatch {
        RecommendationBatch {
            as_of_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            generated_at: Utc::now(),
            items,
        }
    }

    #[test]
    fn reasons_survive_storage_round_trip() {
        let reasons = vec!["预测收益率: 3.50%".to_string(), "当前价格: ¥12.00".to_string()];
        assert_eq!(split_reasons(&join_reasons(&reasons)), reasons);
        assert!(split_reasons("").is_empty());
    }

    #[test]
    fn target_price_applies_percent_return() {
        assert!((target_price(12.0, 3.5) - 12.42).abs() < 1e-9);
        assert_eq!(target_price(8.0, 0.0), 8.0);
    }

    #[test]
    fn empty_batch_is_valid() {
        assert!(batch(vec![]).validate().is_ok());
    }

    #[test]
    fn rejects_gap_in_ranks() {
        let b = batch(vec![item(1, "A"), item(3, "B")]);
        assert!(b.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_instrument() {
        let b = batch(vec![item(1, "A"), item(2, "A")]);
        assert!(b.validate().is_err());
    }
}
