//! Technical indicators over daily bars.
//!
//! Every series function returns one value per input position. Positions without enough
//! history are `None`. The `latest` helpers fall back to neutral values instead of failing so
//! that scoring always receives a number.

use serde::{Deserialize, Serialize};

pub const NEUTRAL_RSI: f64 = 50.0;
pub const NEUTRAL_KDJ: f64 = 50.0;

/// Guards the KDJ range denominator on flat windows.
const KDJ_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kdj {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KdjSeries {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
    pub j: Vec<Option<f64>>,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Mean of the last `n` values (or all of them when fewer are available).
pub fn tail_mean(values: &[f64], n: usize) -> Option<f64> {
    let start = values.len().saturating_sub(n);
    mean(&values[start..])
}

pub fn latest(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

pub fn moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, mean)
}

pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, sample_std)
}

fn rolling(values: &[f64], window: usize, f: impl Fn(&[f64]) -> Option<f64>) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                None
            } else {
                f(&values[i + 1 - window..=i])
            }
        })
        .collect()
}

/// EMA with alpha = 2 / (window + 1), seeded from the first value.
pub fn exponential_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    smooth(values, 2.0 / (window as f64 + 1.0))
}

fn smooth(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// RSI from simple averages of the trailing `window` gains and losses.
///
/// A window with no losses yields 100, a window with neither gains nor losses yields 50.
pub fn rsi(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window == 0 || closes.len() <= window {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    for i in window..closes.len() {
        let recent = &deltas[i - window..i];
        let avg_gain = recent.iter().map(|d| d.max(0.0)).sum::<f64>() / window as f64;
        let avg_loss = recent.iter().map(|d| (-d).max(0.0)).sum::<f64>() / window as f64;

        let value = if avg_loss == 0.0 {
            if avg_gain == 0.0 {
                NEUTRAL_RSI
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
        out[i] = Some(value.clamp(0.0, 100.0));
    }
    out
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let ema_fast = exponential_moving_average(closes, fast);
    let ema_slow = exponential_moving_average(closes, slow);
    let line: Vec<f64> = ema_fast.iter().zip(&ema_slow).map(|(f, s)| f - s).collect();
    let signal_line = exponential_moving_average(&line, signal);
    let histogram = line.iter().zip(&signal_line).map(|(l, s)| l - s).collect();

    MacdSeries {
        line,
        signal: signal_line,
        histogram,
    }
}

impl MacdSeries {
    pub fn latest(&self) -> Macd {
        Macd {
            line: self.line.last().copied().unwrap_or(0.0),
            signal: self.signal.last().copied().unwrap_or(0.0),
            histogram: self.histogram.last().copied().unwrap_or(0.0),
        }
    }
}

pub fn bollinger_bands(closes: &[f64], window: usize, num_std: f64) -> BollingerSeries {
    let middle = moving_average(closes, window);
    let std = rolling_std(closes, window);

    let upper = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| Some((*m)? + num_std * (*s)?))
        .collect();
    let lower = middle
        .iter()
        .zip(&std)
        .map(|(m, s)| Some((*m)? - num_std * (*s)?))
        .collect();

    BollingerSeries {
        upper,
        middle,
        lower,
    }
}

impl BollingerSeries {
    /// Collapses to the last close when the band is not yet defined.
    pub fn latest_or(&self, fallback: f64) -> Bollinger {
        Bollinger {
            upper: latest(&self.upper).unwrap_or(fallback),
            middle: latest(&self.middle).unwrap_or(fallback),
            lower: latest(&self.lower).unwrap_or(fallback),
        }
    }
}

/// KDJ stochastic oscillator. K and D start at 50 and move 1/3 of the way towards the new
/// input each bar.
pub fn kdj(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> KdjSeries {
    let len = closes.len().min(highs.len()).min(lows.len());
    let mut out = KdjSeries {
        k: vec![None; len],
        d: vec![None; len],
        j: vec![None; len],
    };
    if window == 0 {
        return out;
    }

    let mut k_prev = NEUTRAL_KDJ;
    let mut d_prev = NEUTRAL_KDJ;
    for i in (window - 1)..len {
        let range = i + 1 - window..=i;
        let lowest = lows[range.clone()].iter().copied().fold(f64::INFINITY, f64::min);
        let highest = highs[range].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let rsv = (closes[i] - lowest) / (highest - lowest + KDJ_EPSILON) * 100.0;

        let k = k_prev * 2.0 / 3.0 + rsv / 3.0;
        let d = d_prev * 2.0 / 3.0 + k / 3.0;
        out.k[i] = Some(k);
        out.d[i] = Some(d);
        out.j[i] = Some(3.0 * k - 2.0 * d);

        k_prev = k;
        d_prev = d;
    }
    out
}

impl KdjSeries {
    pub fn latest(&self) -> Kdj {
        Kdj {
            k: latest(&self.k).unwrap_or(NEUTRAL_KDJ),
            d: latest(&self.d).unwrap_or(NEUTRAL_KDJ),
            j: latest(&self.j).unwrap_or(NEUTRAL_KDJ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn moving_average_leaves_warmup_undefined() {
        let ma = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(ma.len(), 5);
        assert_eq!(ma[0], None);
        assert_eq!(ma[1], None);
        assert_relative_eq!(ma[2].unwrap(), 2.0);
        assert_relative_eq!(ma[4].unwrap(), 4.0);
    }

    #[test]
    fn ema_is_seeded_from_first_value() {
        let ema = exponential_moving_average(&[10.0, 20.0, 20.0], 3);
        // alpha = 0.5
        assert_relative_eq!(ema[0], 10.0);
        assert_relative_eq!(ema[1], 15.0);
        assert_relative_eq!(ema[2], 17.5);
    }

    #[test]
    fn rsi_of_rising_series_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 10.0 + i as f64 * 0.1).collect();
        let rsi = rsi(&closes, 14);
        assert_eq!(rsi[13], None);
        assert_relative_eq!(latest(&rsi).unwrap(), 100.0);
    }

    #[test]
    fn rsi_of_flat_series_is_neutral() {
        let closes = vec![10.0; 20];
        assert_relative_eq!(latest(&rsi(&closes, 14)).unwrap(), NEUTRAL_RSI);
    }

    #[test]
    fn rsi_balances_gains_and_losses() {
        // Alternating +1 / -1 gives equal average gain and loss.
        let closes: Vec<f64> = (0..21).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        assert_relative_eq!(latest(&rsi(&closes, 14)).unwrap(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn rsi_stays_in_range_on_mixed_moves() {
        let closes = [
            10.0, 10.4, 9.8, 9.9, 10.7, 11.2, 10.1, 9.5, 9.7, 10.2, 10.9, 11.5, 11.1, 10.8, 10.3,
            10.6, 9.9, 10.0, 10.8, 11.3,
        ];
        for v in rsi(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn macd_histogram_positive_on_accelerating_uptrend() {
        let closes: Vec<f64> = (0..40).map(|i| 10.0 * 1.01_f64.powi(i)).collect();
        let m = macd(&closes, 12, 26, 9).latest();
        assert!(m.line > 0.0);
        assert!(m.histogram > 0.0);
        assert_relative_eq!(m.histogram, m.line - m.signal);
    }

    #[test]
    fn macd_of_flat_series_is_zero() {
        let m = macd(&[5.0; 30], 12, 26, 9).latest();
        assert_relative_eq!(m.line, 0.0);
        assert_relative_eq!(m.histogram, 0.0);
    }

    #[test]
    fn bollinger_collapses_on_flat_series() {
        let b = bollinger_bands(&[8.0; 20], 20, 2.0).latest_or(0.0);
        assert_relative_eq!(b.middle, 8.0);
        assert_relative_eq!(b.upper, 8.0);
        assert_relative_eq!(b.lower, 8.0);
    }

    #[test]
    fn bollinger_band_width_uses_sample_std() {
        let closes: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let b = bollinger_bands(&closes, 20, 2.0).latest_or(0.0);
        let std = sample_std(&closes).unwrap();
        assert_relative_eq!(b.middle, 10.5);
        assert_relative_eq!(b.upper - b.middle, 2.0 * std, epsilon = 1e-9);
    }

    #[test]
    fn bollinger_falls_back_when_history_is_short() {
        let b = bollinger_bands(&[1.0, 2.0], 20, 2.0).latest_or(2.0);
        assert_eq!(b.middle, 2.0);
    }

    #[test]
    fn kdj_flat_window_does_not_divide_by_zero() {
        let flat = vec![10.0; 12];
        let series = kdj(&flat, &flat, &flat, 9);
        assert_eq!(series.k[7], None);
        let out = series.latest();
        assert!(out.k.is_finite() && out.d.is_finite() && out.j.is_finite());
    }

    #[test]
    fn kdj_first_value_moves_from_fifty() {
        let highs = vec![11.0; 9];
        let lows = vec![9.0; 9];
        let closes = vec![11.0; 9];
        let out = kdj(&highs, &lows, &closes, 9).latest();
        // RSV ~= 100, so K = 50 * 2/3 + 100/3 and D = 50 * 2/3 + K/3.
        assert_relative_eq!(out.k, 200.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(out.d, 100.0 / 3.0 + out.k / 3.0, epsilon = 1e-6);
        assert_relative_eq!(out.j, 3.0 * out.k - 2.0 * out.d, epsilon = 1e-9);
    }

    #[test]
    fn kdj_defaults_to_neutral_without_history() {
        let out = kdj(&[1.0], &[1.0], &[1.0], 9).latest();
        assert_eq!(out, Kdj { k: 50.0, d: 50.0, j: 50.0 });
    }

    #[test]
    fn sample_std_needs_two_values() {
        assert_eq!(sample_std(&[1.0]), None);
        assert_relative_eq!(sample_std(&[1.0, 3.0]).unwrap(), 2.0_f64.sqrt());
    }
}
