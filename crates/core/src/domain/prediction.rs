use crate::domain::price::Instrument;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendSignal {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiSignal {
    Oversold,
    Neutral,
    Overbought,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdSignal {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    pub trend: TrendSignal,
    pub rsi: RsiSignal,
    pub macd: MacdSignal,
}

/// Heuristic forecast for one instrument, derived from a single feature snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub instrument: Instrument,
    /// Percent, rounded to 2 decimals.
    pub predicted_return: f64,
    /// Clamped to [0.3, 0.9], rounded to 3 decimals.
    pub confidence: f64,
    pub current_price: f64,
    pub signals: Signals,
}
