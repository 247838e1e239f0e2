// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), where σ is the *population* standard
// deviation of the same window.

use super::moving_average::sma;

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate Bollinger Bands over the last `period` closes.
///
/// Returns `None` when:
/// - Fewer than `period` data points (indicator is absent, not zeroed).
/// - `period == 0`.
/// - A non-finite band value is produced.
pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    let middle = sma(closes, period)?;

    let window = &closes[closes.len() - period..];
    let variance =
        window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let band = num_std * variance.sqrt();

    let upper = middle + band;
    let lower = middle - band;

    if upper.is_finite() && lower.is_finite() {
        Some(BollingerBands {
            upper,
            middle,
            lower,
        })
    } else {
        None
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!((bb.middle - 10.5).abs() < 1e-10);
    }

    #[test]
    fn bollinger_bands_symmetric_around_middle() {
        let closes: Vec<f64> = (1..=25).map(|x| (x as f64).sin() * 5.0 + 100.0).collect();
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        let up = bb.upper - bb.middle;
        let down = bb.middle - bb.lower;
        assert!((up - down).abs() < 1e-10);
    }

    #[test]
    fn bollinger_population_std_dev() {
        // Window [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, population σ = 2.
        let closes = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bb = bollinger(&closes, 8, 2.0).unwrap();
        assert!((bb.middle - 5.0).abs() < 1e-10);
        assert!((bb.upper - 9.0).abs() < 1e-10);
        assert!((bb.lower - 1.0).abs() < 1e-10);
    }

    #[test]
    fn bollinger_flat_series_collapses() {
        let closes = vec![100.0; 20];
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.upper - 100.0).abs() < 1e-10);
        assert!((bb.lower - 100.0).abs() < 1e-10);
    }

    #[test]
    fn bollinger_insufficient_data() {
        assert!(bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
        assert!(bollinger(&[], 1, 2.0).is_none());
    }
}
