// =============================================================================
// Feature math — SMA / RSI / ATR / returns / volume ratio / range
// =============================================================================
//
// Pure slice-in, Option-out helpers. Insufficient history yields `None`, and
// the readiness layer decides whether that blocks a decision. All windows
// count from the end of the series (most recent last).
// =============================================================================

pub mod context;
pub mod readiness;

use crate::market::frame::BarFrame;

/// Simple moving average of the last `n` values.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let tail = &values[values.len() - n..];
    Some(tail.iter().sum::<f64>() / n as f64)
}

/// `close[-1] / close[-1-k] − 1`.
pub fn ret_k(closes: &[f64], k: usize) -> Option<f64> {
    if k == 0 || closes.len() < k + 1 {
        return None;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - k];
    if base == 0.0 {
        return None;
    }
    Some(last / base - 1.0)
}

/// Wilder-style RSI over the last `period` deltas (needs `period + 1`
/// closes). All-gain windows clamp to 100.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let tail = &closes[closes.len() - (period + 1)..];
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for w in tail.windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            gain_sum += delta;
        } else {
            loss_sum += -delta;
        }
    }
    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - 100.0 / (1.0 + rs);
    rsi.is_finite().then_some(rsi)
}

/// Average true range over the last `period` bars (needs `period + 1` bars
/// for the previous-close term).
pub fn atr(frames: &[BarFrame], period: usize) -> Option<f64> {
    if period == 0 || frames.len() < period + 1 {
        return None;
    }
    let tail = &frames[frames.len() - (period + 1)..];
    let mut tr_sum = 0.0;
    for w in tail.windows(2) {
        let prev_close = w[0].close;
        let bar = &w[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        tr_sum += tr;
    }
    let atr = tr_sum / period as f64;
    atr.is_finite().then_some(atr)
}

/// `last_volume / mean(volume[-21:-1])` for `n = 20`: the most recent bar's
/// volume against the average of the `n` bars before it.
pub fn vol_ratio(volumes: &[f64], n: usize) -> Option<f64> {
    if n == 0 || volumes.len() < n + 1 {
        return None;
    }
    let last = volumes[volumes.len() - 1];
    let prior = &volumes[volumes.len() - 1 - n..volumes.len() - 1];
    let mean = prior.iter().sum::<f64>() / n as f64;
    if mean == 0.0 {
        return None;
    }
    Some(last / mean)
}

/// `(max(high) − min(low)) / last_close` over the last `n` bars.
pub fn range_pct(frames: &[BarFrame], n: usize) -> Option<f64> {
    if n == 0 || frames.len() < n {
        return None;
    }
    let tail = &frames[frames.len() - n..];
    let high = tail.iter().map(|f| f.high).fold(f64::MIN, f64::max);
    let low = tail.iter().map(|f| f.low).fold(f64::MAX, f64::min);
    let last_close = tail.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some((high - low) / last_close)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::frame::{BarWindow, Instrument, BAR_SCHEMA_VERSION};
    use crate::market::session::SessionPhase;

    fn bar(start_ts_ms: i64, high: f64, low: f64, close: f64) -> BarFrame {
        BarFrame {
            schema_version: BAR_SCHEMA_VERSION.to_string(),
            instrument: Instrument::cn_a("600519"),
            interval: "1d".to_string(),
            window: BarWindow {
                start_ts_ms,
                end_ts_ms: start_ts_ms + 60_000,
                trading_day: "2025-06-02".to_string(),
            },
            session_phase: SessionPhase::Closed,
            open: close,
            high,
            low,
            close,
            volume_shares: 100.0,
            turnover_cny: close * 100.0,
            vwap: close,
            mode: "mock".to_string(),
            provider: "test".to_string(),
        }
    }

    #[test]
    fn sma_basic_and_insufficient() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(sma(&[1.0], 2), None);
        assert_eq!(sma(&[1.0, 2.0], 0), None);
    }

    #[test]
    fn ret_k_basic() {
        let closes = [100.0, 101.0, 102.0, 99.0, 103.0, 105.0];
        let r = ret_k(&closes, 5).unwrap();
        assert!((r - 0.05).abs() < 1e-12);
        assert_eq!(ret_k(&closes, 6), None);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert_eq!(wilder_rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let closes: Vec<f64> = (1..=20).rev().map(|x| x as f64).collect();
        let rsi = wilder_rsi(&closes, 14).unwrap();
        assert!(rsi.abs() < 1e-10);
    }

    #[test]
    fn rsi_in_range_and_insufficient() {
        let closes = [
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57,
        ];
        let rsi = wilder_rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&rsi));
        assert_eq!(wilder_rsi(&closes[..14], 14), None);
    }

    #[test]
    fn atr_uses_previous_close_gap() {
        // A gap up: TR should pick up |high - prev_close|.
        let frames = vec![
            bar(0, 10.0, 9.0, 10.0),
            bar(1, 15.0, 14.0, 14.5), // TR = max(1, 5, 4) = 5
        ];
        let atr1 = atr(&frames, 1).unwrap();
        assert!((atr1 - 5.0).abs() < 1e-12);
        assert_eq!(atr(&frames, 2), None);
    }

    #[test]
    fn vol_ratio_window() {
        let mut volumes = vec![100.0; 20];
        volumes.push(250.0);
        let r = vol_ratio(&volumes, 20).unwrap();
        assert!((r - 2.5).abs() < 1e-12);
        assert_eq!(vol_ratio(&volumes[..20], 20), None);
    }

    #[test]
    fn vol_ratio_zero_denominator() {
        let mut volumes = vec![0.0; 20];
        volumes.push(10.0);
        assert_eq!(vol_ratio(&volumes, 20), None);
    }

    #[test]
    fn range_pct_basic() {
        let frames = vec![bar(0, 12.0, 8.0, 10.0), bar(1, 11.0, 9.0, 10.0)];
        let r = range_pct(&frames, 2).unwrap();
        assert!((r - 0.4).abs() < 1e-12); // (12 - 8) / 10
        assert_eq!(range_pct(&frames, 3), None);
    }
}
