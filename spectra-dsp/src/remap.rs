//! Frequency-domain bin remapping for pitch and frequency shifting.
//!
//! Every bin is moved to the position its centre frequency would take after
//! scaling by the pitch factor and adding the offset, then split linearly
//! between the two nearest output bins. Phases are carried as-is; there is
//! no cross-frame phase correction.

use spectra_analysis::{alloc_buffer, ensure_finite, Complex32, ConfigError, FftSize, SpectralError};
use tracing::debug;

/// What happens to energy mapped past DC or Nyquist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryPolicy {
    /// Out-of-range bins contribute nothing (no folding)
    #[default]
    Drop,
    /// Out-of-range bins are pinned to the nearest edge bin
    Clip,
}

impl BoundaryPolicy {
    /// Map a clip flag to a policy
    pub fn from_clip(clip: bool) -> Self {
        if clip {
            BoundaryPolicy::Clip
        } else {
            BoundaryPolicy::Drop
        }
    }

    pub fn is_clip(self) -> bool {
        self == BoundaryPolicy::Clip
    }
}

/// Shift applied by the remapper
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftParams {
    /// Frequency multiplier (1.0 = unchanged)
    pub pitch_scale: f64,
    /// Offset in Hz added after scaling
    pub frequency_shift: f64,
    pub boundary: BoundaryPolicy,
}

impl Default for ShiftParams {
    fn default() -> Self {
        Self {
            pitch_scale: 1.0,
            frequency_shift: 0.0,
            boundary: BoundaryPolicy::Drop,
        }
    }
}

impl ShiftParams {
    /// Convert an interval in cents to a frequency ratio
    #[inline]
    pub fn cents_to_scale(cents: f64) -> f64 {
        2.0f64.powf(cents / 1200.0)
    }

    /// Interval in cents of the current pitch scale
    pub fn cents(&self) -> f64 {
        1200.0 * self.pitch_scale.log2()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_finite("pitch scale", self.pitch_scale)?;
        ensure_finite("frequency shift", self.frequency_shift)
    }
}

/// Reject zero, negative and non-finite sample rates
pub fn validate_sample_rate(sample_rate: f32) -> Result<(), ConfigError> {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidSampleRate(sample_rate))
    }
}

/// Bin remapper for one frame size
pub struct BinRemapper {
    size: FftSize,
    sample_rate: f64,
    params: ShiftParams,
    /// Accumulation target, written back in one copy
    output: Vec<Complex32>,
}

impl BinRemapper {
    pub fn new(size: FftSize, sample_rate: f32, params: ShiftParams) -> Result<Self, SpectralError> {
        validate_sample_rate(sample_rate)?;
        params.validate()?;

        Ok(Self {
            size,
            sample_rate: sample_rate as f64,
            params,
            output: alloc_buffer("remap output", size.num_bins(), Complex32::default())?,
        })
    }

    #[inline]
    pub fn params(&self) -> ShiftParams {
        self.params
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate as f32
    }

    pub fn set_params(&mut self, params: ShiftParams) -> Result<(), ConfigError> {
        params.validate()?;
        debug!(?params, "shift parameters set");
        self.params = params;
        Ok(())
    }

    pub fn set_pitch_scale(&mut self, pitch_scale: f64) -> Result<(), ConfigError> {
        self.set_params(ShiftParams {
            pitch_scale,
            ..self.params
        })
    }

    pub fn set_frequency_shift(&mut self, frequency_shift: f64) -> Result<(), ConfigError> {
        self.set_params(ShiftParams {
            frequency_shift,
            ..self.params
        })
    }

    pub fn set_boundary(&mut self, boundary: BoundaryPolicy) {
        self.params.boundary = boundary;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), ConfigError> {
        validate_sample_rate(sample_rate)?;
        self.sample_rate = sample_rate as f64;
        Ok(())
    }

    /// Fractional destination of bin `bin`, or `None` when it is dropped
    pub fn target_bin(&self, bin: usize) -> Option<f64> {
        let n = self.size.as_usize() as f64;
        let half = self.size.half() as f64;

        let frequency = bin as f64 * self.sample_rate / n;
        let shifted = frequency * self.params.pitch_scale + self.params.frequency_shift;
        let target = shifted * n / self.sample_rate;

        match self.params.boundary {
            BoundaryPolicy::Clip if !target.is_nan() => Some(target.clamp(0.0, half)),
            _ if (0.0..=half).contains(&target) => Some(target),
            _ => None,
        }
    }

    /// Remap `spectrum` (N/2 + 1 bins) in place
    pub fn remap(&mut self, spectrum: &mut [Complex32]) {
        let half = self.size.half();
        debug_assert_eq!(spectrum.len(), half + 1);

        self.output.fill(Complex32::default());

        for (bin, &value) in spectrum.iter().enumerate() {
            let Some(target) = self.target_bin(bin) else {
                continue;
            };

            let lower = target.floor() as usize;
            let frac = (target - lower as f64) as f32;

            self.output[lower] += value * (1.0 - frac);
            if lower < half {
                self.output[lower + 1] += value * frac;
            }
        }

        spectrum.copy_from_slice(&self.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_spectrum(size: FftSize) -> Vec<Complex32> {
        (0..size.num_bins())
            .map(|i| Complex32::new(1.0 + i as f32 * 0.01, -0.5 + (i % 7) as f32 * 0.1))
            .collect()
    }

    fn energy(spectrum: &[Complex32]) -> f32 {
        spectrum.iter().map(|c| c.norm_sqr()).sum()
    }

    #[test]
    fn test_cents_to_scale() {
        assert!((ShiftParams::cents_to_scale(1200.0) - 2.0).abs() < 1e-12);
        assert!((ShiftParams::cents_to_scale(-1200.0) - 0.5).abs() < 1e-12);
        assert!((ShiftParams::cents_to_scale(0.0) - 1.0).abs() < 1e-12);

        let params = ShiftParams {
            pitch_scale: ShiftParams::cents_to_scale(700.0),
            ..ShiftParams::default()
        };
        assert!((params.cents() - 700.0).abs() < 1e-9);
    }

    #[test]
    fn test_identity_reproduces_spectrum() {
        for sample_rate in [44100.0, 48000.0] {
            let mut remapper = BinRemapper::new(FftSize::Medium, sample_rate, ShiftParams::default()).unwrap();
            let original = ramp_spectrum(FftSize::Medium);
            let mut spectrum = original.clone();

            remapper.remap(&mut spectrum);
            assert_eq!(spectrum, original);
        }
    }

    #[test]
    fn test_identity_conserves_energy() {
        let mut remapper = BinRemapper::new(FftSize::Small, 48000.0, ShiftParams::default()).unwrap();
        let mut spectrum = ramp_spectrum(FftSize::Small);
        let before = energy(&spectrum);

        remapper.remap(&mut spectrum);
        assert!((energy(&spectrum) - before).abs() < 1e-3);
    }

    #[test]
    fn test_clip_boundary() {
        let size = FftSize::Medium;
        let half = size.half();
        let sample_rate = 48000.0f32;
        // Five bins of offset: 5 * 48000 / 1024 Hz
        let offset = 5.0 * sample_rate as f64 / size.as_usize() as f64;
        assert_eq!(offset, 234.375);

        let mut spectrum = vec![Complex32::default(); size.num_bins()];
        spectrum[half] = Complex32::new(3.0, 0.0);

        let clip = ShiftParams {
            frequency_shift: offset,
            boundary: BoundaryPolicy::Clip,
            ..ShiftParams::default()
        };
        let mut remapper = BinRemapper::new(size, sample_rate, clip).unwrap();
        assert_eq!(remapper.target_bin(half), Some(half as f64));

        let mut clipped = spectrum.clone();
        remapper.remap(&mut clipped);
        assert_eq!(clipped[half], Complex32::new(3.0, 0.0));
        assert!((energy(&clipped) - 9.0).abs() < 1e-6);

        remapper.set_boundary(BoundaryPolicy::Drop);
        assert_eq!(remapper.target_bin(half), None);

        let mut dropped = spectrum.clone();
        remapper.remap(&mut dropped);
        assert_eq!(energy(&dropped), 0.0);
    }

    #[test]
    fn test_negative_targets() {
        let params = ShiftParams {
            frequency_shift: -1000.0,
            ..ShiftParams::default()
        };
        let mut remapper = BinRemapper::new(FftSize::Tiny, 48000.0, params).unwrap();
        assert_eq!(remapper.target_bin(0), None);

        remapper.set_boundary(BoundaryPolicy::Clip);
        assert_eq!(remapper.target_bin(0), Some(0.0));
    }

    #[test]
    fn test_contributions_accumulate() {
        let size = FftSize::Tiny;
        let params = ShiftParams {
            pitch_scale: 0.5,
            ..ShiftParams::default()
        };
        let mut remapper = BinRemapper::new(size, 48000.0, params).unwrap();
        let mut spectrum = vec![Complex32::new(1.0, 0.0); size.num_bins()];

        remapper.remap(&mut spectrum);

        // Bin 2i lands on i; bins 2i - 1 and 2i + 1 each put half on i
        assert!((spectrum[0].re - 1.5).abs() < 1e-6);
        assert!((spectrum[10].re - 2.0).abs() < 1e-6);
        assert!((spectrum[64].re - 1.5).abs() < 1e-6);
        assert!(spectrum[65..].iter().all(|c| *c == Complex32::default()));
    }

    #[test]
    fn test_fractional_split() {
        let size = FftSize::Tiny;
        let mut remapper = BinRemapper::new(size, 48000.0, ShiftParams::default()).unwrap();
        // Quarter of a bin: 48000 / 256 / 4 Hz
        remapper.set_frequency_shift(46.875).unwrap();

        let mut spectrum = vec![Complex32::default(); size.num_bins()];
        spectrum[20] = Complex32::new(0.0, 4.0);
        remapper.remap(&mut spectrum);

        assert!((spectrum[20].im - 3.0).abs() < 1e-6);
        assert!((spectrum[21].im - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(BinRemapper::new(FftSize::Tiny, 0.0, ShiftParams::default()).is_err());
        assert!(BinRemapper::new(FftSize::Tiny, f32::NAN, ShiftParams::default()).is_err());

        let mut remapper = BinRemapper::new(FftSize::Tiny, 48000.0, ShiftParams::default()).unwrap();
        assert!(remapper.set_pitch_scale(f64::INFINITY).is_err());
        assert!(remapper.set_frequency_shift(f64::NAN).is_err());
        assert_eq!(remapper.params(), ShiftParams::default());
        assert_eq!(remapper.set_sample_rate(-1.0), Err(ConfigError::InvalidSampleRate(-1.0)));
        assert_eq!(remapper.sample_rate(), 48000.0);
    }
}
