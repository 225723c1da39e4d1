//! Error types shared by the analysis and resynthesis stages

use std::collections::TryReserveError;
use thiserror::Error;

/// A configuration value was rejected; the previous configuration stays active
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported frame size {0} (expected 256, 512, 1024, 2048 or 4096)")]
    InvalidFrameSize(usize),
    #[error("hop size {hop} must be between 1 and the frame size {frame}")]
    InvalidHopSize { hop: usize, frame: usize },
    #[error("accumulate-time windowing needs non-overlapping frames (hop {hop}, frame {frame})")]
    OverlappedAccumulate { hop: usize, frame: usize },
    #[error("noise covariance must be positive and finite, got {0}")]
    InvalidNoiseCovariance(f64),
    #[error("smoother length must be at least 1")]
    ZeroSmootherLength,
    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f32),
    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },
}

/// Buffer allocation failed while building a processing instance
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("failed to allocate {len} elements for the {buffer} buffer")]
    Allocation {
        buffer: &'static str,
        len: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Any failure surfaced by a spectral processing stage
#[derive(Error, Debug)]
pub enum SpectralError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("transform failed: {0}")]
    Transform(#[from] realfft::FftError),
}

/// Allocate a buffer of `len` copies of `value`, reporting failure instead of aborting
pub fn alloc_buffer<T: Clone>(buffer: &'static str, len: usize, value: T) -> Result<Vec<T>, ResourceError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|source| ResourceError::Allocation { buffer, len, source })?;
    data.resize(len, value);
    Ok(data)
}

/// Reject NaN and infinities in a control value
pub fn ensure_finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_buffer_fills_value() {
        let buf = alloc_buffer("test", 8, 0.5f32).unwrap();
        assert_eq!(buf.len(), 8);
        assert!(buf.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_alloc_buffer_reports_overflow() {
        let err = alloc_buffer("huge", usize::MAX, 0u64).unwrap_err();
        let ResourceError::Allocation { buffer, len, .. } = err;
        assert_eq!(buffer, "huge");
        assert_eq!(len, usize::MAX);
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite("gain", 1.0).is_ok());
        assert_eq!(
            ensure_finite("gain", f64::NAN).map_err(|e| e.to_string()),
            Err("gain must be finite, got NaN".to_string())
        );
    }
}
