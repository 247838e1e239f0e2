// =============================================================================
// Moving Averages: SMA and EMA
// =============================================================================
//
// SMA is the arithmetic mean of the last `period` closes.
//
// EMA formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `period` closes.
// =============================================================================

/// Simple moving average of the last `period` closes.
///
/// # Edge cases
/// - `period == 0` => `None` (division by zero guard)
/// - `closes.len() < period` => `None`: undefined, never zero
/// - Non-finite result => `None`
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;

    if mean.is_finite() {
        Some(mean)
    } else {
        None
    }
}

/// Exponential moving average over the whole `closes` slice.
///
/// Seeded with the SMA of the first `period` closes, then the standard
/// recurrence for every subsequent close. Returns the latest value.
///
/// # Edge cases
/// - `period == 0` => `None`
/// - `closes.len() < period` => `None`
/// - Non-finite intermediate values abort the computation with `None`.
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period + 1) as f64;

    // Seed: SMA of the first `period` values.
    let seed = closes[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return None;
    }

    let mut prev = seed;
    for &close in &closes[period..] {
        let next = close * multiplier + prev * (1.0 - multiplier);
        if !next.is_finite() {
            return None;
        }
        prev = next;
    }

    Some(prev)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_basic() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let value = sma(&closes, 5).unwrap();
        assert!((value - 3.0).abs() < 1e-10);
    }

    #[test]
    fn sma_uses_trailing_window() {
        let closes = vec![10.0, 10.0, 1.0, 2.0, 3.0];
        let value = sma(&closes, 3).unwrap();
        assert!((value - 2.0).abs() < 1e-10);
    }

    #[test]
    fn sma_insufficient_data() {
        assert!(sma(&[1.0, 2.0], 3).is_none());
        assert!(sma(&[], 1).is_none());
    }

    #[test]
    fn sma_period_zero() {
        assert!(sma(&[1.0, 2.0, 3.0], 0).is_none());
    }

    #[test]
    fn ema_flat_series_equals_price() {
        let closes = vec![50.0; 30];
        let value = ema(&closes, 12).unwrap();
        assert!((value - 50.0).abs() < 1e-10);
    }

    #[test]
    fn ema_seed_is_sma() {
        // Exactly `period` closes => the EMA is just the seed SMA.
        let closes = vec![1.0, 2.0, 3.0, 4.0];
        let value = ema(&closes, 4).unwrap();
        assert!((value - 2.5).abs() < 1e-10);
    }

    #[test]
    fn ema_tracks_recent_prices() {
        // Rising series: EMA should sit above the SMA of the full window.
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let e = ema(&closes, 10).unwrap();
        let s = sma(&closes, 40).unwrap();
        assert!(e > s, "EMA {e} should exceed full-window SMA {s}");
    }

    #[test]
    fn ema_insufficient_data() {
        assert!(ema(&[1.0, 2.0], 3).is_none());
        assert!(ema(&[], 5).is_none());
    }
}
