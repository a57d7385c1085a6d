use crate::domain::prediction::{MacdSignal, Prediction, RsiSignal, TrendSignal};
use crate::domain::recommendation::{target_price, RankedRecommendation};
use std::cmp::Ordering;

const STRONG_BREAKOUT_PCT: f64 = 5.0;
const VOLUME_SUPPORTED_PCT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingOptions {
    pub min_price: f64,
    pub max_price: f64,
    pub top_n: usize,
}

impl From<&crate::config::RecommendOptions> for RankingOptions {
    fn from(opts: &crate::config::RecommendOptions) -> Self {
        Self {
            min_price: opts.min_price,
            max_price: opts.max_price,
            top_n: opts.top_n,
        }
    }
}

/// Keeps positive forecasts inside the price band, best first, and assigns ranks 1..=n.
///
/// Equal returns are ordered by ts_code so reruns produce identical batches.
pub fn rank(predictions: &[Prediction], opts: &RankingOptions) -> Vec<RankedRecommendation> {
    let mut eligible: Vec<&Prediction> = predictions
        .iter()
        .filter(|p| p.predicted_return > 0.0)
        .filter(|p| p.current_price >= opts.min_price && p.current_price <= opts.max_price)
        .collect();

    eligible.sort_by(|a, b| {
        b.predicted_return
            .partial_cmp(&a.predicted_return)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.instrument.ts_code.cmp(&b.instrument.ts_code))
    });

    eligible
        .into_iter()
        .take(opts.top_n)
        .enumerate()
        .map(|(idx, p)| {
            let target = target_price(p.current_price, p.predicted_return);
            RankedRecommendation {
                rank: (idx + 1) as i32,
                ts_code: p.instrument.ts_code.clone(),
                name: p.instrument.name.clone(),
                predicted_return: p.predicted_return,
                confidence: Some(p.confidence),
                current_price: p.current_price,
                target_price: target,
                reasons: reasons(p, target),
            }
        })
        .collect()
}

pub fn reasons(p: &Prediction, target: f64) -> Vec<String> {
    let mut out = vec![
        format!("预测收益率: {:.2}%", p.predicted_return),
        format!("当前价格: ¥{:.2}", p.current_price),
        format!("目标价格: ¥{target:.2}"),
        format!("模型置信度: {:.2}%", p.confidence * 100.0),
    ];

    if p.predicted_return > STRONG_BREAKOUT_PCT {
        out.push("技术面强势，突破关键位".to_string());
    } else if p.predicted_return > VOLUME_SUPPORTED_PCT {
        out.push("趋势向上，成交量配合".to_string());
    }

    if p.signals.trend == TrendSignal::Up && p.signals.macd == MacdSignal::Bullish {
        out.push("均线多头排列，MACD 金叉".to_string());
    }
    match p.signals.rsi {
        RsiSignal::Oversold => out.push("RSI 超卖，存在反弹空间".to_string()),
        RsiSignal::Overbought => out.push("RSI 超买，注意回调风险".to_string()),
        RsiSignal::Neutral => {}
    }

    out
}
