//! Reputation math: confidence from sample size, time decay toward a
//! neutral baseline, and EWMA folding of new observations.
//!
//! ```text
//! confidence = round(1 − 1/(1 + n·0.1), 2)
//! decayed    = 0.5 + (score − 0.5)·e^(−r·months)
//! next       = α·signal + (1 − α)·decayed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ReputationDimension;

/// Neutral score: no evidence means no opinion.
pub const BASELINE: f64 = 0.5;
pub const DEFAULT_LEARNING_RATE: f64 = 0.3;
pub const DEFAULT_MONTHLY_DECAY_RATE: f64 = 0.05;
pub const DAYS_PER_MONTH: f64 = 30.44;

const CONFIDENCE_GROWTH: f64 = 0.1;
/// Rounding to 2 places would otherwise reach 1.0 from n = 1990 on.
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Tuning for [`apply_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReputationParams {
    /// EWMA weight of the new observation, in `(0, 1]`.
    pub learning_rate: f64,
    /// Decay rate `r` per month toward [`BASELINE`].
    pub monthly_decay_rate: f64,
}

impl Default for ReputationParams {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            monthly_decay_rate: DEFAULT_MONTHLY_DECAY_RATE,
        }
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Confidence grows with sample count, approaching but never reaching 1.
pub fn compute_confidence(sample_size: u64) -> f64 {
    let n = sample_size as f64;
    round_to(1.0 - 1.0 / (1.0 + n * CONFIDENCE_GROWTH), 2).min(MAX_CONFIDENCE)
}

/// Pull `score` toward [`BASELINE`] by `months_elapsed` months of decay.
///
/// Returns `score` unchanged when `months_elapsed <= 0`.
pub fn compute_decayed_score(score: f64, months_elapsed: f64, monthly_decay_rate: f64) -> f64 {
    if months_elapsed <= 0.0 {
        return score;
    }
    let factor = (-monthly_decay_rate * months_elapsed).exp();
    round_to(BASELINE + (score - BASELINE) * factor, 3)
}

/// Fractional months from `from` to `to`; zero when `to` precedes `from`.
pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let seconds = (to - from).num_seconds().max(0) as f64;
    seconds / 86_400.0 / DAYS_PER_MONTH
}

/// Fold one observation into a dimension.
///
/// A dimension with no history takes the observation as its score.
/// Otherwise the stored score decays for the time since its last signal
/// before the EWMA update. A late observation decays nothing and leaves
/// `last_signal` where it was.
pub fn apply_signal(
    existing: Option<&ReputationDimension>,
    signal_score: f64,
    observed_at: DateTime<Utc>,
    params: &ReputationParams,
) -> ReputationDimension {
    let signal_score = signal_score.clamp(0.0, 1.0);
    let last_signal = existing.map_or(observed_at, |dim| dim.last_signal.max(observed_at));
    let (score, sample_size) = match existing {
        None => (signal_score, 1),
        Some(dim) => {
            let months = months_between(dim.last_signal, observed_at);
            let decayed = compute_decayed_score(dim.score, months, params.monthly_decay_rate);
            let alpha = params.learning_rate;
            (
                alpha * signal_score + (1.0 - alpha) * decayed,
                dim.sample_size + 1,
            )
        }
    };
    ReputationDimension {
        score: round_to(score.clamp(0.0, 1.0), 3),
        confidence: compute_confidence(sample_size),
        sample_size,
        last_signal,
    }
}

/// `Σ(score·weight) / Σweight`, or [`BASELINE`] when the weights sum to zero.
pub fn weighted_score(parts: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = parts.iter().map(|(_, w)| w).sum();
    if total_weight == 0.0 {
        return BASELINE;
    }
    let weighted: f64 = parts.iter().map(|(s, w)| s * w).sum();
    round_to(weighted / total_weight, 3)
}
