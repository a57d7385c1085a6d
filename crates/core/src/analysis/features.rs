use crate::analysis::indicators::{self, Bollinger, Kdj, Macd, NEUTRAL_RSI};
use crate::domain::error::InstrumentError;
use crate::domain::price::PriceSeries;
use serde::{Deserialize, Serialize};

/// Shortest series a snapshot can be computed from.
pub const MIN_HISTORY: usize = 20;

const RSI_WINDOW: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BOLLINGER_WINDOW: usize = 20;
const BOLLINGER_STD: f64 = 2.0;
const KDJ_WINDOW: usize = 9;

/// Everything the scoring heuristic looks at, computed from the trailing price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub current_price: f64,
    pub ma5: f64,
    pub ma10: f64,
    pub ma20: f64,
    pub rsi: f64,
    pub macd: Macd,
    pub bollinger: Bollinger,
    pub kdj: Kdj,
    pub momentum_5: f64,
    pub momentum_10: f64,
    pub volatility: f64,
    /// 0..=3, one point each for price > MA5, MA5 > MA10, MA10 > MA20.
    pub trend_score: u8,
    /// 1 when the 5-day average volume exceeds the 10-day one.
    pub volume_trend: u8,
    pub avg_return: f64,
}

pub fn compute_features(series: &PriceSeries) -> Result<FeatureSnapshot, InstrumentError> {
    if series.len() < MIN_HISTORY {
        return Err(InstrumentError::InsufficientData {
            have: series.len(),
            need: MIN_HISTORY,
        });
    }

    let closes = series.closes();
    let highs = series.highs();
    let lows = series.lows();
    let volumes = series.volumes();
    let pct = series.percent_changes();

    let current_price = closes[closes.len() - 1];
    let ma5 = last_ma(&closes, 5)?;
    let ma10 = last_ma(&closes, 10)?;
    let ma20 = last_ma(&closes, 20)?;

    let rsi = indicators::latest(&indicators::rsi(&closes, RSI_WINDOW)).unwrap_or(NEUTRAL_RSI);
    let macd = indicators::macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL).latest();
    let bollinger = indicators::bollinger_bands(&closes, BOLLINGER_WINDOW, BOLLINGER_STD)
        .latest_or(current_price);
    let kdj = indicators::kdj(&highs, &lows, &closes, KDJ_WINDOW).latest();

    let momentum_5 = indicators::tail_mean(&pct, 5).unwrap_or(0.0);
    let momentum_10 = indicators::tail_mean(&pct, 10).unwrap_or(0.0);
    let volatility = indicators::sample_std(&pct).unwrap_or(0.0);
    let avg_return = indicators::mean(&pct).unwrap_or(0.0);

    let trend_score = [current_price > ma5, ma5 > ma10, ma10 > ma20]
        .iter()
        .filter(|held| **held)
        .count() as u8;

    let volume_trend = match (
        indicators::tail_mean(&volumes, 5),
        indicators::tail_mean(&volumes, 10),
    ) {
        (Some(v5), Some(v10)) if v5 > v10 => 1,
        _ => 0,
    };

    Ok(FeatureSnapshot {
        current_price,
        ma5,
        ma10,
        ma20,
        rsi,
        macd,
        bollinger,
        kdj,
        momentum_5,
        momentum_10,
        volatility,
        trend_score,
        volume_trend,
        avg_return,
    })
}

fn last_ma(closes: &[f64], window: usize) -> Result<f64, InstrumentError> {
    indicators::latest(&indicators::moving_average(closes, window)).ok_or(
        InstrumentError::InsufficientData {
            have: closes.len(),
            need: window,
        },
    )
}
