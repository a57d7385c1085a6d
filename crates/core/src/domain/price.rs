use crate::domain::error::InstrumentError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A listed A-share instrument, e.g. `600519.SH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub ts_code: String,
    pub name: String,
}

/// Basic listing data as published by the exchange feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockInfo {
    pub ts_code: String,
    pub name: String,
    pub industry: Option<String>,
    pub market: Option<String>,
}

/// One daily bar. `volume` is in lots, `amount` in thousands of CNY, `percent_change` in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
    pub percent_change: f64,
}

/// Daily bars of one instrument, strictly ascending by date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    ts_code: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Sorts the points by date and rejects duplicate dates and non-finite prices.
    pub fn new(ts_code: impl Into<String>, mut points: Vec<PricePoint>) -> Result<Self, InstrumentError> {
        let ts_code = ts_code.into();

        if let Some(bad) = points.iter().find(|p| !is_finite_point(p)) {
            return Err(InstrumentError::InvalidSeries(format!(
                "non-finite values on {}",
                bad.date
            )));
        }

        points.sort_by_key(|p| p.date);
        if let Some(w) = points.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(InstrumentError::InvalidSeries(format!(
                "duplicate date {}",
                w[0].date
            )));
        }

        Ok(Self { ts_code, points })
    }

    pub fn ts_code(&self) -> &str {
        &self.ts_code
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.volume).collect()
    }

    pub fn percent_changes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.percent_change).collect()
    }
}

fn is_finite_point(p: &PricePoint) -> bool {
    [p.open, p.high, p.low, p.close, p.volume, p.amount, p.percent_change]
        .iter()
        .all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(day: u32, close: f64) -> PricePoint {
        PricePoint {
            date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
            amount: 10_000.0,
            percent_change: 0.0,
        }
    }

    #[test]
    fn sorts_points_ascending() {
        let series = PriceSeries::new("000001.SZ", vec![point(3, 3.0), point(1, 1.0), point(2, 2.0)]).unwrap();
        assert_eq!(series.closes(), vec![1.0, 2.0, 3.0]);
        assert_eq!(series.ts_code(), "000001.SZ");
    }

    #[test]
    fn rejects_duplicate_dates() {
        let err = PriceSeries::new("000001.SZ", vec![point(1, 1.0), point(1, 1.1)]).unwrap_err();
        assert_eq!(err.kind(), "invalid_series");
    }

    #[test]
    fn rejects_nan_close() {
        let err = PriceSeries::new("000001.SZ", vec![point(1, f64::NAN)]).unwrap_err();
        assert!(matches!(err, InstrumentError::InvalidSeries(_)));
    }
}
