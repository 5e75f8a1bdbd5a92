//! Latency estimation.
//!
//! Round trips are measured by echoing a ping timestamp. The one-way
//! estimate is half the round trip, smoothed with an exponential moving
//! average.

use crate::core::constants::DEFAULT_LATENCY_ALPHA;

/// Smoothed one-way latency estimator.
///
/// `e = alpha * (rtt / 2) + (1 - alpha) * e_prev`. Without a prior, the
/// first sample initializes `e` directly.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyEstimator {
    alpha: f64,
    estimate: Option<f64>,
    samples: u64,
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_ALPHA)
    }
}

impl LatencyEstimator {
    /// Create an estimator with no prior.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            estimate: None,
            samples: 0,
        }
    }

    /// Create an estimator with a known prior estimate in seconds.
    pub fn seeded(alpha: f64, initial: f64) -> Self {
        Self {
            estimate: Some(initial.max(0.0)),
            ..Self::new(alpha)
        }
    }

    /// Feed a round-trip time in seconds. Returns the new estimate.
    ///
    /// Negative samples (clock skew) count as zero.
    pub fn update(&mut self, rtt: f64) -> f64 {
        let one_way = rtt.max(0.0) / 2.0;
        let next = match self.estimate {
            Some(prev) => self.alpha * one_way + (1.0 - self.alpha) * prev,
            None => one_way,
        };
        self.estimate = Some(next);
        self.samples += 1;
        next
    }

    /// Current estimate in seconds, `0.0` before any sample.
    pub fn latency(&self) -> f64 {
        self.estimate.unwrap_or(0.0)
    }

    /// Current estimate in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.latency() * 1000.0
    }

    /// Check if the estimate is backed by a sample or prior.
    pub fn is_initialized(&self) -> bool {
        self.estimate.is_some()
    }

    /// Number of samples fed so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Smoothing factor.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}
