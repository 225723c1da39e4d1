//! Simplified one-dimensional Kalman smoother for control-rate scalars.
//!
//! Unlike a textbook Kalman filter no covariance is carried between calls.
//! Every observation re-runs the recursion over the whole retained window,
//! starting from the baseline with unit error covariance:
//!
//! ```text
//! Pk = 1; xk = baseline
//! for h in history (oldest to newest):
//!     Kk = Pk / (Pk + R)
//!     xk = xk + Kk * (h - xk)
//!     Pk = (1 - Kk) * Pk
//! ```
//!
//! The estimate is therefore a deterministic function of the current window
//! and cannot drift over long runs. Cost is O(K) per observation.

use crate::error::{ensure_finite, ConfigError};
use crate::ring::HistoryRing;
use std::num::NonZeroUsize;
use tracing::{debug, warn};

/// Upper bound on the history length
pub const MAX_ITERATIONS: usize = 100;
/// Default history length
pub const DEFAULT_ITERATIONS: usize = 30;
/// Default measurement noise covariance
pub const DEFAULT_NOISE_COVARIANCE: f64 = 0.5;
/// Default baseline, a hair above zero
pub const DEFAULT_BASELINE: f64 = 1e-13;

/// Smoother parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmootherConfig {
    /// History length K (1..=100)
    pub iterations: usize,
    /// Measurement noise covariance R (> 0)
    pub noise_covariance: f64,
    /// Initial estimate and history fill value
    pub baseline: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            noise_covariance: DEFAULT_NOISE_COVARIANCE,
            baseline: DEFAULT_BASELINE,
        }
    }
}

impl SmootherConfig {
    /// Check every field, clamping nothing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::ZeroSmootherLength);
        }
        validate_noise_covariance(self.noise_covariance)?;
        ensure_finite("smoother baseline", self.baseline)
    }
}

fn validate_noise_covariance(noise_covariance: f64) -> Result<(), ConfigError> {
    if noise_covariance.is_finite() && noise_covariance > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidNoiseCovariance(noise_covariance))
    }
}

/// Result of a calibration pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Observations seen while calibrating
    pub observations: u64,
    /// Mean observation, now the baseline
    pub mean: f64,
    /// Sample standard deviation of the observations
    pub std_dev: f64,
    /// Noise covariance in effect after calibration
    pub noise_covariance: f64,
}

/// Running statistics gathered while calibrating
#[derive(Debug, Default)]
struct CalibrationStats {
    count: u64,
    sum: f64,
    sum_squares: f64,
    /// Sum of absolute differences between consecutive observations
    sum_variation: f64,
    previous: Option<f64>,
}

impl CalibrationStats {
    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_squares += value * value;
        if let Some(previous) = self.previous {
            self.sum_variation += (value - previous).abs();
        }
        self.previous = Some(value);
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        ((self.sum_squares - self.sum * self.sum / n) / (n - 1.0)).max(0.0).sqrt()
    }

    /// Mean absolute step between consecutive observations
    fn mean_variation(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.sum_variation / (self.count - 1) as f64
    }
}

/// Windowed recursive estimator
pub struct RecursiveSmoother {
    history: HistoryRing<f64>,
    noise_covariance: f64,
    baseline: f64,
    estimate: f64,
    calibration: Option<CalibrationStats>,
}

impl RecursiveSmoother {
    /// Create a smoother with every history slot set to the baseline.
    ///
    /// An `iterations` value above [`MAX_ITERATIONS`] is clamped.
    pub fn new(config: SmootherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let iterations = clamp_iterations(config.iterations)?;

        Ok(Self {
            history: HistoryRing::new(iterations, config.baseline),
            noise_covariance: config.noise_covariance,
            baseline: config.baseline,
            estimate: config.baseline,
            calibration: None,
        })
    }

    /// Feed one observation and return the new estimate.
    ///
    /// Non-finite observations are stored as 0 so they cannot poison the window.
    pub fn process(&mut self, observation: f64) -> f64 {
        let observation = if observation.is_finite() { observation } else { 0.0 };

        if let Some(stats) = self.calibration.as_mut() {
            stats.observe(observation);
        }

        self.history.push(observation);

        let mut pk = 1.0;
        let mut xk = self.baseline;
        for h in self.history.snapshot() {
            let kk = pk / (pk + self.noise_covariance);
            xk += kk * (h - xk);
            pk *= 1.0 - kk;
        }

        self.estimate = if xk.is_finite() { xk } else { 0.0 };
        self.estimate
    }

    /// Most recent estimate (the baseline before any observation)
    #[inline]
    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        self.history.capacity()
    }

    #[inline]
    pub fn noise_covariance(&self) -> f64 {
        self.noise_covariance
    }

    #[inline]
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Current parameters
    pub fn config(&self) -> SmootherConfig {
        SmootherConfig {
            iterations: self.iterations(),
            noise_covariance: self.noise_covariance,
            baseline: self.baseline,
        }
    }

    /// Set R; non-positive or non-finite values are rejected and R is unchanged
    pub fn set_noise_covariance(&mut self, noise_covariance: f64) -> Result<(), ConfigError> {
        validate_noise_covariance(noise_covariance)?;
        debug!(noise_covariance, "smoother noise covariance set");
        self.noise_covariance = noise_covariance;
        Ok(())
    }

    /// Set the history length, keeping the newest observations.
    ///
    /// Returns the length actually applied after clamping to [`MAX_ITERATIONS`].
    pub fn set_iterations(&mut self, iterations: usize) -> Result<usize, ConfigError> {
        let iterations = clamp_iterations(iterations)?;
        self.history.resize(iterations, self.baseline);
        debug!(iterations = iterations.get(), "smoother length set");
        Ok(iterations.get())
    }

    /// Set the starting estimate used by every recursion
    pub fn set_baseline(&mut self, baseline: f64) -> Result<(), ConfigError> {
        ensure_finite("smoother baseline", baseline)?;
        debug!(baseline, "smoother baseline set");
        self.baseline = baseline;
        Ok(())
    }

    /// Refill the history with the baseline
    pub fn reset(&mut self) {
        self.history.fill(self.baseline);
        self.estimate = self.baseline;
    }

    /// Start gathering statistics about incoming observations
    pub fn start_calibration(&mut self) {
        debug!("smoother calibration started");
        self.calibration = Some(CalibrationStats::default());
    }

    #[inline]
    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// Stop calibrating and adopt the measured statistics.
    ///
    /// The baseline becomes the observed mean and R the mean absolute step
    /// between consecutive observations; a step of zero leaves R unchanged.
    /// The history is refilled with the new baseline. Returns `None` when
    /// calibration was not running or saw no observations.
    pub fn finish_calibration(&mut self) -> Option<Calibration> {
        let stats = self.calibration.take()?;
        if stats.count == 0 {
            return None;
        }

        self.baseline = stats.mean();
        let variation = stats.mean_variation();
        if let Err(e) = self.set_noise_covariance(variation) {
            warn!(error = %e, "calibration kept the previous noise covariance");
        }
        self.reset();

        let calibration = Calibration {
            observations: stats.count,
            mean: self.baseline,
            std_dev: stats.std_dev(),
            noise_covariance: self.noise_covariance,
        };
        debug!(?calibration, "smoother calibration finished");
        Some(calibration)
    }
}

fn clamp_iterations(iterations: usize) -> Result<NonZeroUsize, ConfigError> {
    if iterations > MAX_ITERATIONS {
        warn!(requested = iterations, max = MAX_ITERATIONS, "smoother length clamped");
    }
    NonZeroUsize::new(iterations.min(MAX_ITERATIONS)).ok_or(ConfigError::ZeroSmootherLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoother(iterations: usize, noise_covariance: f64, baseline: f64) -> RecursiveSmoother {
        RecursiveSmoother::new(SmootherConfig {
            iterations,
            noise_covariance,
            baseline,
        })
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let s = RecursiveSmoother::new(SmootherConfig::default()).unwrap();
        assert_eq!(s.iterations(), 30);
        assert_eq!(s.noise_covariance(), 0.5);
        assert_eq!(s.estimate(), 1e-13);
    }

    #[test]
    fn test_constant_history_is_fixed_point() {
        let mut s = smoother(10, 0.5, 2.0);
        assert!((s.process(2.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_converges_monotonically() {
        let (k, r, baseline, target) = (30, 0.01, 0.0, 1.0);
        let mut s = smoother(k, r, baseline);
        let mut last = s.estimate();

        for _ in 0..k {
            let estimate = s.process(target);
            assert!(estimate >= last, "estimate moved away: {} -> {}", last, estimate);
            assert!(estimate <= target + 1e-12);
            last = estimate;
        }

        // Closed form after K identical observations: (baseline - v) * R / (R + K)
        let residual = (baseline - target) * r / (r + k as f64);
        assert!((last - (target + residual)).abs() < 1e-9);
        assert!((last - target).abs() < 1e-3);
    }

    #[test]
    fn test_convergence_for_any_positive_covariance() {
        for r in [0.001, 0.5, 2.0, 50.0] {
            let mut s = smoother(20, r, 5.0);
            let mut last = s.estimate();
            for _ in 0..20 {
                let estimate = s.process(-1.0);
                assert!(estimate <= last);
                last = estimate;
            }
            let expected = -1.0 + 6.0 * r / (r + 20.0);
            assert!((last - expected).abs() < 1e-9, "R={}: {} vs {}", r, last, expected);
        }
    }

    #[test]
    fn test_rejects_non_positive_covariance() {
        let mut s = smoother(10, 0.5, 0.0);
        assert_eq!(s.set_noise_covariance(0.0), Err(ConfigError::InvalidNoiseCovariance(0.0)));
        assert!(s.set_noise_covariance(-1.0).is_err());
        assert!(s.set_noise_covariance(f64::NAN).is_err());
        assert_eq!(s.noise_covariance(), 0.5);

        assert!(s.set_noise_covariance(2.0).is_ok());
        assert_eq!(s.noise_covariance(), 2.0);
    }

    #[test]
    fn test_rejects_invalid_construction() {
        let config = SmootherConfig {
            noise_covariance: 0.0,
            ..SmootherConfig::default()
        };
        assert!(RecursiveSmoother::new(config).is_err());

        let config = SmootherConfig {
            iterations: 0,
            ..SmootherConfig::default()
        };
        assert_eq!(RecursiveSmoother::new(config).err(), Some(ConfigError::ZeroSmootherLength));
    }

    #[test]
    fn test_iterations_are_clamped() {
        let mut s = smoother(10, 0.5, 0.0);
        assert_eq!(s.set_iterations(250), Ok(100));
        assert_eq!(s.iterations(), 100);
        assert_eq!(s.set_iterations(0), Err(ConfigError::ZeroSmootherLength));
        assert_eq!(s.iterations(), 100);
    }

    #[test]
    fn test_nan_observation_is_isolated() {
        let mut s = smoother(5, 0.5, 0.0);
        for _ in 0..5 {
            s.process(1.0);
        }
        let poisoned = s.process(f64::NAN);
        assert!(poisoned.is_finite());

        for _ in 0..5 {
            assert!(s.process(1.0).is_finite());
        }
        // Once the sentinel leaves the window the estimate matches a clean run
        let mut clean = smoother(5, 0.5, 0.0);
        for _ in 0..5 {
            clean.process(1.0);
        }
        assert!((s.estimate() - clean.estimate()).abs() < 1e-12);
    }

    #[test]
    fn test_infinite_observation_is_isolated() {
        let mut s = smoother(3, 0.5, 0.0);
        assert!(s.process(f64::INFINITY).is_finite());
        assert!(s.process(f64::NEG_INFINITY).is_finite());
    }

    #[test]
    fn test_reset_restores_baseline() {
        let mut s = smoother(4, 0.5, 0.25);
        s.process(10.0);
        s.reset();
        assert_eq!(s.estimate(), 0.25);
        assert!((s.process(0.25) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_calibration_adopts_statistics() {
        let mut s = smoother(10, 0.5, 0.0);
        s.start_calibration();
        assert!(s.is_calibrating());

        for v in [1.0, 3.0, 1.0, 3.0, 1.0] {
            s.process(v);
        }
        let calibration = s.finish_calibration().unwrap();

        assert!(!s.is_calibrating());
        assert_eq!(calibration.observations, 5);
        assert!((calibration.mean - 1.8).abs() < 1e-12);
        assert!((calibration.noise_covariance - 2.0).abs() < 1e-12);
        assert!((calibration.std_dev - 1.095_445).abs() < 1e-5);
        assert_eq!(s.baseline(), calibration.mean);
        assert_eq!(s.noise_covariance(), 2.0);
    }

    #[test]
    fn test_calibration_on_constant_input_keeps_covariance() {
        let mut s = smoother(10, 0.75, 0.0);
        s.start_calibration();
        for _ in 0..8 {
            s.process(4.0);
        }
        let calibration = s.finish_calibration().unwrap();
        assert_eq!(calibration.noise_covariance, 0.75);
        assert_eq!(s.baseline(), 4.0);
    }

    #[test]
    fn test_finish_without_start() {
        let mut s = smoother(10, 0.5, 0.0);
        assert!(s.finish_calibration().is_none());
        s.start_calibration();
        assert!(s.finish_calibration().is_none());
    }
}
