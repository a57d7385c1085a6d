use crate::analysis::features::FeatureSnapshot;
use crate::domain::prediction::{MacdSignal, Prediction, RsiSignal, Signals, TrendSignal};
use crate::domain::price::Instrument;
use std::collections::BTreeMap;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const MIN_CONFIDENCE: f64 = 0.3;
const MAX_CONFIDENCE: f64 = 0.9;

/// Weighted tally of bullish signals, in [0, 4.5].
pub fn signal_count(f: &FeatureSnapshot) -> f64 {
    let mut count = 0.0;
    if f.trend_score >= 2 {
        count += 1.0;
    }
    if f.momentum_5 > 0.0 {
        count += 1.0;
    }
    if f.rsi > RSI_OVERSOLD && f.rsi < RSI_OVERBOUGHT {
        count += 0.5;
    }
    if f.macd.histogram > 0.0 {
        count += 1.0;
    }
    if f.kdj.j > 0.0 && f.kdj.j < 100.0 {
        count += 0.5;
    }
    if f.volume_trend > 0 {
        count += 0.5;
    }
    count
}

pub fn predict(instrument: &Instrument, f: &FeatureSnapshot) -> Prediction {
    let signals_held = signal_count(f);

    let mut base = f.momentum_5 * 0.4 + f.momentum_10 * 0.3 + f.avg_return * 0.3;
    if signals_held >= 3.0 {
        base *= 1.2;
    } else if signals_held <= 1.0 {
        base *= 0.8;
    }

    let confidence = (0.5 + (signals_held - 2.0) * 0.1 - f.volatility / 20.0)
        .clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);

    Prediction {
        instrument: instrument.clone(),
        predicted_return: round_to(base, 2),
        confidence: round_to(confidence, 3),
        current_price: round_to(f.current_price, 2),
        signals: signals(f),
    }
}

pub fn signals(f: &FeatureSnapshot) -> Signals {
    let trend = if f.trend_score >= 2 {
        TrendSignal::Up
    } else {
        TrendSignal::Down
    };
    let rsi = if f.rsi < RSI_OVERSOLD {
        RsiSignal::Oversold
    } else if f.rsi > RSI_OVERBOUGHT {
        RsiSignal::Overbought
    } else {
        RsiSignal::Neutral
    };
    let macd = if f.macd.histogram > 0.0 {
        MacdSignal::Bullish
    } else {
        MacdSignal::Bearish
    };
    Signals { trend, rsi, macd }
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}

/// Feature snapshots gathered for one run, keyed by ts_code.
///
/// Owned by the run that builds it, so concurrent runs never see each other's snapshots.
#[derive(Debug, Default)]
pub struct ScoringContext {
    snapshots: BTreeMap<String, (Instrument, FeatureSnapshot)>,
}

impl ScoringContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instrument: Instrument, snapshot: FeatureSnapshot) {
        self.snapshots
            .insert(instrument.ts_code.clone(), (instrument, snapshot));
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn predictions(&self) -> Vec<Prediction> {
        self.snapshots
            .values()
            .map(|(instrument, f)| predict(instrument, f))
            .collect()
    }
}
