//! Paired real-to-complex transforms for one frame size.
//!
//! The engine owns its forward and inverse plans together with every buffer
//! they touch. Plans are built once per frame size and never swapped
//! individually: a new size means a new engine.
//!
//! The inverse transform is unnormalized, `inverse(forward(x)) == N * x`.
//! Callers that want true amplitude go through [`SpectralTransformEngine::synthesize_into`],
//! the only place the division by N happens.

use crate::error::{alloc_buffer, ConfigError, SpectralError};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use std::fmt;
use std::sync::Arc;

/// Supported analysis frame sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum FftSize {
    /// 256 samples - lowest latency, coarse frequency resolution
    Tiny = 256,
    /// 512 samples
    Small = 512,
    /// 1024 samples - default for resynthesis
    #[default]
    Medium = 1024,
    /// 2048 samples - default for onset detection
    Large = 2048,
    /// 4096 samples - finest resolution, most latency
    Huge = 4096,
}

impl FftSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as usize
    }

    /// Index of the Nyquist bin (N/2)
    #[inline]
    pub fn half(self) -> usize {
        self.as_usize() / 2
    }

    /// Number of unique bins of a real transform (N/2 + 1)
    #[inline]
    pub fn num_bins(self) -> usize {
        self.half() + 1
    }
}

impl TryFrom<usize> for FftSize {
    type Error = ConfigError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            256 => Ok(FftSize::Tiny),
            512 => Ok(FftSize::Small),
            1024 => Ok(FftSize::Medium),
            2048 => Ok(FftSize::Large),
            4096 => Ok(FftSize::Huge),
            other => Err(ConfigError::InvalidFrameSize(other)),
        }
    }
}

impl fmt::Display for FftSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_usize())
    }
}

/// Forward/inverse transform pair with pre-allocated buffers
pub struct SpectralTransformEngine {
    size: FftSize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    /// Time-domain frame (N reals)
    time: Vec<f32>,
    /// Unique spectrum bins (N/2 + 1)
    spectrum: Vec<Complex32>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
    /// 1/N, applied when inverse output is consumed
    norm_factor: f32,
}

impl SpectralTransformEngine {
    /// Plan both directions and allocate buffers for `size`
    pub fn new(size: FftSize) -> Result<Self, SpectralError> {
        let n = size.as_usize();
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);
        let forward_scratch_len = forward.get_scratch_len();
        let inverse_scratch_len = inverse.get_scratch_len();

        Ok(Self {
            size,
            forward,
            inverse,
            time: alloc_buffer("time", n, 0.0)?,
            spectrum: alloc_buffer("spectrum", size.num_bins(), Complex32::default())?,
            forward_scratch: alloc_buffer("forward scratch", forward_scratch_len, Complex32::default())?,
            inverse_scratch: alloc_buffer("inverse scratch", inverse_scratch_len, Complex32::default())?,
            norm_factor: 1.0 / n as f32,
        })
    }

    #[inline]
    pub fn size(&self) -> FftSize {
        self.size
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.size.as_usize()
    }

    #[inline]
    pub fn num_bins(&self) -> usize {
        self.size.num_bins()
    }

    /// Time-domain buffer; load a frame here before [`forward`](Self::forward)
    #[inline]
    pub fn time(&self) -> &[f32] {
        &self.time
    }

    #[inline]
    pub fn time_mut(&mut self) -> &mut [f32] {
        &mut self.time
    }

    #[inline]
    pub fn spectrum(&self) -> &[Complex32] {
        &self.spectrum
    }

    #[inline]
    pub fn spectrum_mut(&mut self) -> &mut [Complex32] {
        &mut self.spectrum
    }

    /// Transform the time buffer into the spectrum buffer.
    ///
    /// The time buffer is used as scratch and holds garbage afterwards.
    pub fn forward(&mut self) -> Result<(), SpectralError> {
        self.forward
            .process_with_scratch(&mut self.time, &mut self.spectrum, &mut self.forward_scratch)?;
        Ok(())
    }

    /// Transform the spectrum buffer back into the time buffer, unnormalized.
    ///
    /// Imaginary parts of the DC and Nyquist bins cannot be represented in a
    /// real signal and are discarded first. The spectrum buffer is used as
    /// scratch.
    pub fn inverse(&mut self) -> Result<(), SpectralError> {
        let half = self.size.half();
        self.spectrum[0].im = 0.0;
        self.spectrum[half].im = 0.0;
        self.inverse
            .process_with_scratch(&mut self.spectrum, &mut self.time, &mut self.inverse_scratch)?;
        Ok(())
    }

    /// Inverse transform and write true-amplitude samples into `out`
    pub fn synthesize_into(&mut self, out: &mut [f32]) -> Result<(), SpectralError> {
        debug_assert_eq!(out.len(), self.time.len());
        self.inverse()?;
        for (o, &t) in out.iter_mut().zip(&self.time) {
            *o = t * self.norm_factor;
        }
        Ok(())
    }
}
