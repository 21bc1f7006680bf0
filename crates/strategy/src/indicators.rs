//! Indicator math on closing-price series.
//!
//! Every function returns `None` when the series is shorter than the
//! required lookback — no evaluation, never a spurious value. Moving
//! averages are exponentially weighted except where a simple rolling
//! window is part of the indicator's definition (Bollinger middle band).

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average series, seeded with the SMA of the first
/// `period` values. Output index 0 corresponds to input index `period - 1`.
pub fn ema_series(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut current = seed;
    for value in &values[period..] {
        current = alpha * value + (1.0 - alpha) * current;
        out.push(current);
    }
    Some(out)
}

/// Latest EMA value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).and_then(|s| s.last().copied())
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in values[..=period].windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    for pair in values[period..].windows(2) {
        let delta = pair[1] - pair[0];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line and signal line, with the previous pair for cross detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub prev_line: f64,
    pub prev_signal: f64,
}

impl Macd {
    /// MACD line crossed above the signal line on the latest bar.
    pub fn bullish_cross(&self) -> bool {
        self.prev_line <= self.prev_signal && self.line > self.signal
    }

    pub fn histogram(&self) -> f64 {
        self.line - self.signal
    }
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<Macd> {
    if fast >= slow {
        return None;
    }
    let fast_ema = ema_series(values, fast)?;
    let slow_ema = ema_series(values, slow)?;

    // Align the fast series to the slow one's start.
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .zip(fast_ema[offset..].iter())
        .map(|(s, f)| f - s)
        .collect();

    let signal = ema_series(&line, signal_period)?;
    if line.len() < 2 || signal.len() < 2 {
        return None;
    }
    Some(Macd {
        line: line[line.len() - 1],
        signal: signal[signal.len() - 1],
        prev_line: line[line.len() - 2],
        prev_signal: signal[signal.len() - 2],
    })
}

/// Bollinger bands around a simple moving average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger(values: &[f64], period: usize, std_devs: f64) -> Option<Bollinger> {
    let middle = sma(values, period)?;
    let window = &values[values.len() - period..];
    let variance =
        window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / period as f64;
    let band = std_devs * variance.sqrt();
    Some(Bollinger {
        upper: middle + band,
        middle,
        lower: middle - band,
    })
}

/// Lowest and highest close over the last `lookback` values.
pub fn rolling_extrema(values: &[f64], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || values.len() < lookback {
        return None;
    }
    let window = &values[values.len() - lookback..];
    let mut low = f64::INFINITY;
    let mut high = f64::NEG_INFINITY;
    for &value in window {
        low = low.min(value);
        high = high.max(value);
    }
    Some((low, high))
}
