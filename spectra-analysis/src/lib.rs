//! Spectral analysis for Spectra
//!
//! Provides the streaming STFT building blocks (frame buffering, paired
//! real transforms), phase-deviation and RMS onset detection, and the
//! recursive smoother used to denoise control-rate signals.

mod error;
mod frame;
mod onset;
mod phase;
mod ring;
mod rms;
mod smoother;
mod transform;

pub use error::{alloc_buffer, ensure_finite, ConfigError, ResourceError, SpectralError};
pub use frame::{hann_window, WindowPlacement, WindowedFrameBuffer};
pub use onset::{
    BlockStatus, DetectionEvent, DetectionFunction, DetectorConfig, DetectorKind, OnsetDetector,
    PhaseDeviationOnsets, RmsOnsets,
};
pub use phase::{wrap_phase, BinHistory, PhaseDeviationDetector};
pub use ring::HistoryRing;
pub use rms::{block_rms, RmsDetector};
pub use smoother::{
    Calibration, RecursiveSmoother, SmootherConfig, DEFAULT_BASELINE, DEFAULT_ITERATIONS,
    DEFAULT_NOISE_COVARIANCE, MAX_ITERATIONS,
};
pub use transform::{FftSize, SpectralTransformEngine};

/// Complex sample type used for spectra
pub use rustfft::num_complex::Complex32;
