// =============================================================================
// Acquisition Loop: provider failover with synthetic fallback
// =============================================================================
//
// Per tick and per subscribed symbol:
//
//   TryNextProvider -> (Success: write Quote) | (AllExhausted: SynthesizeFallback)
//
// Fallback synthesis keeps the pipeline advancing with zero working
// providers: downstream consumers always receive *some* data for a polled
// symbol rather than an outage signal. Synthetic quotes perturb the last
// known close by a bounded Gaussian step and are tagged `"synthetic"`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, warn};

use crate::providers::QuoteProvider;
use crate::types::{now_ms, AssetClass, Quote, SOURCE_SYNTHETIC};

/// Outcome of one failover pass across the provider chain.
///
/// Modelled as a tagged variant rather than an error path: exhaustion is an
/// expected state with a well-defined next step (synthesis), not a failure
/// to propagate.
#[derive(Debug)]
pub enum AcquisitionResult {
    Acquired(Quote),
    Exhausted,
}

/// Try each provider in priority order under a per-provider timeout.
///
/// Any provider error (timeout, HTTP failure, malformed payload) moves on
/// to the next provider; nothing here is fatal.
pub async fn acquire(
    providers: &[Arc<dyn QuoteProvider>],
    symbol: &str,
    per_provider_timeout: Duration,
) -> AcquisitionResult {
    for provider in providers {
        match tokio::time::timeout(per_provider_timeout, provider.fetch_quote(symbol)).await {
            Ok(Ok(quote)) => {
                debug!(symbol, provider = provider.name(), "quote acquired");
                return AcquisitionResult::Acquired(quote);
            }
            Ok(Err(e)) if e.is_provider_failure() => {
                debug!(symbol, provider = provider.name(), error = %e, "provider failed: trying next");
            }
            Ok(Err(e)) => {
                warn!(symbol, provider = provider.name(), error = %e, "unexpected provider error: trying next");
            }
            Err(_) => {
                warn!(
                    symbol,
                    provider = provider.name(),
                    timeout_ms = per_provider_timeout.as_millis() as u64,
                    "provider timed out: trying next"
                );
            }
        }
    }
    AcquisitionResult::Exhausted
}

/// Parameters for the fallback generator.
#[derive(Debug, Clone, Copy)]
pub struct FallbackParams {
    /// Seed close used when a symbol has no history at all.
    pub seed_price: f64,
    /// Hard cap on the relative perturbation per tick (e.g. 0.005 = 0.5%).
    pub max_drift: f64,
}

/// Synthesize one random-walk quote from the last known close.
///
/// The Gaussian step has a standard deviation of a third of `max_drift` and
/// is clamped to `±max_drift`, so a synthetic tick can never move the price
/// more than the configured bound.
pub fn synthesize_fallback(
    symbol: &str,
    last_close: Option<f64>,
    params: &FallbackParams,
    asset_class: AssetClass,
) -> Quote {
    let base = last_close.unwrap_or(params.seed_price);
    let mut rng = rand::thread_rng();

    let normal = Normal::new(0.0, params.max_drift / 3.0)
        .unwrap_or_else(|_| Normal::new(0.0, 0.001).expect("fixed sigma is valid"));
    let drift = normal
        .sample(&mut rng)
        .clamp(-params.max_drift, params.max_drift);

    let close = base * (1.0 + drift);
    let open = base;
    let high = open.max(close) * (1.0 + rng.gen_range(0.0..params.max_drift / 2.0));
    let low = open.min(close) * (1.0 - rng.gen_range(0.0..params.max_drift / 2.0));
    let volume = rng.gen_range(1_000.0..100_000.0);

    Quote {
        symbol: symbol.to_string(),
        timestamp: now_ms(),
        open,
        high,
        low,
        close,
        volume,
        bid: None,
        ask: None,
        spread: None,
        asset_class,
        source: SOURCE_SYNTHETIC.to_string(),
    }
}
