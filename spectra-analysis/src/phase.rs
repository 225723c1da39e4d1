//! Phase-deviation detection function.
//!
//! Each bin's next value is predicted from its previous magnitude and a
//! linear extrapolation of its last two phases. The frame's detection value
//! is the mean distance between prediction and observation, so steady
//! partials score near zero and transients score high.

use crate::error::{alloc_buffer, ResourceError};
use crate::transform::FftSize;
use rustfft::num_complex::Complex32;
use std::f32::consts::{PI, TAU};

/// Wrap a phase into (-π, π]
#[inline]
pub fn wrap_phase(phase: f32) -> f32 {
    let wrapped = (phase + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// What a bin looked like over the last two frames
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinHistory {
    pub magnitude: f32,
    pub phase: f32,
    pub previous_phase: f32,
}

impl BinHistory {
    /// Value this bin is expected to take in the next frame
    #[inline]
    pub fn predict(&self) -> Complex32 {
        let phase = wrap_phase(2.0 * self.phase - self.previous_phase);
        Complex32::from_polar(self.magnitude, phase)
    }

    #[inline]
    fn update(&mut self, observed: Complex32) {
        self.previous_phase = self.phase;
        self.phase = observed.im.atan2(observed.re);
        self.magnitude = observed.norm();
    }
}

/// Per-frame phase-deviation scorer for one frame size
pub struct PhaseDeviationDetector {
    size: FftSize,
    history: Vec<BinHistory>,
}

impl PhaseDeviationDetector {
    /// Allocate history for bins `0..N/2`
    pub fn new(size: FftSize) -> Result<Self, ResourceError> {
        Ok(Self {
            size,
            history: alloc_buffer("bin history", size.half(), BinHistory::default())?,
        })
    }

    #[inline]
    pub fn size(&self) -> FftSize {
        self.size
    }

    /// Number of analysed bins (N/2, Nyquist excluded)
    #[inline]
    pub fn bins(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> &[BinHistory] {
        &self.history
    }

    /// Score one spectrum and roll the history forward.
    ///
    /// `spectrum` holds at least N/2 bins; anything past N/2 - 1 is ignored.
    /// Non-finite bins are treated as silent so they never reach the history.
    pub fn evaluate(&mut self, spectrum: &[Complex32]) -> f32 {
        debug_assert!(spectrum.len() >= self.history.len());

        let mut total = 0.0;
        for (state, &bin) in self.history.iter_mut().zip(spectrum) {
            let observed = if bin.is_finite() { bin } else { Complex32::default() };
            total += (state.predict() - observed).norm();
            state.update(observed);
        }

        let eta = total / self.history.len() as f32;
        if eta.is_finite() {
            eta
        } else {
            0.0
        }
    }

    /// Forget all previous frames
    pub fn reset(&mut self) {
        self.history.fill(BinHistory::default());
    }
}
