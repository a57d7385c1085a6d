use std::fmt;

/// Why a single instrument was left out of a run. Never fatal for the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentError {
    InsufficientData { have: usize, need: usize },
    InvalidSeries(String),
    Fetch(String),
}

impl InstrumentError {
    pub fn kind(&self) -> &'static str {
        match self {
            InstrumentError::InsufficientData { .. } => "insufficient_data",
            InstrumentError::InvalidSeries(_) => "invalid_series",
            InstrumentError::Fetch(_) => "fetch",
        }
    }
}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentError::InsufficientData { have, need } => {
                write!(f, "insufficient data: {have} points (need {need})")
            }
            InstrumentError::InvalidSeries(detail) => write!(f, "invalid price series: {detail}"),
            InstrumentError::Fetch(detail) => write!(f, "price history fetch failed: {detail}"),
        }
    }
}

impl std::error::Error for InstrumentError {}
