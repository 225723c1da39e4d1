//! Sliding analysis frames with Hann windowing.
//!
//! The buffer holds exactly one in-flight frame. Samples arrive in host
//! blocks through [`WindowedFrameBuffer::fill`], which never takes more than
//! the frame still needs, so a caller looping over its block cannot overrun
//! the frame. Once a frame has been consumed, [`WindowedFrameBuffer::advance`]
//! keeps the newest `N - H` samples at the front for the next hop.

use crate::error::{alloc_buffer, ConfigError, SpectralError};
use crate::transform::FftSize;
use std::f32::consts::PI;

/// Periodic Hann window of `size` coefficients
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Where the analysis window is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowPlacement {
    /// Each sample is weighted by the coefficient of the slot it is written to.
    /// Only valid when the hop equals the frame size.
    Accumulate,
    /// The whole frame is weighted when it is copied out for a transform
    #[default]
    Transform,
    /// No window (rectangular), used by the direct resynthesis path
    Rectangular,
}

/// Accumulator turning a sample stream into overlapping frames
pub struct WindowedFrameBuffer {
    frame_size: usize,
    hop_size: usize,
    placement: WindowPlacement,
    window: Vec<f32>,
    samples: Vec<f32>,
    /// Samples currently held
    fill: usize,
}

impl WindowedFrameBuffer {
    /// Create a frame buffer producing a frame every `hop_size` samples
    pub fn new(size: FftSize, hop_size: usize, placement: WindowPlacement) -> Result<Self, SpectralError> {
        let frame_size = size.as_usize();
        if hop_size == 0 || hop_size > frame_size {
            return Err(ConfigError::InvalidHopSize {
                hop: hop_size,
                frame: frame_size,
            }
            .into());
        }
        // Windowed samples cannot slide to a new slot
        if placement == WindowPlacement::Accumulate && hop_size < frame_size {
            return Err(ConfigError::OverlappedAccumulate {
                hop: hop_size,
                frame: frame_size,
            }
            .into());
        }

        let mut window = alloc_buffer("window", frame_size, 1.0)?;
        if placement != WindowPlacement::Rectangular {
            window.copy_from_slice(&hann_window(frame_size));
        }

        Ok(Self {
            frame_size,
            hop_size,
            placement,
            window,
            samples: alloc_buffer("frame", frame_size, 0.0)?,
            fill: 0,
        })
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[inline]
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Samples shared between consecutive frames (N - H)
    #[inline]
    pub fn overlap(&self) -> usize {
        self.frame_size - self.hop_size
    }

    #[inline]
    pub fn placement(&self) -> WindowPlacement {
        self.placement
    }

    /// Samples currently buffered
    #[inline]
    pub fn buffered(&self) -> usize {
        self.fill
    }

    /// True when a complete frame is waiting to be consumed
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.fill == self.frame_size
    }

    /// Append samples up to the end of the current frame.
    ///
    /// Returns how many samples of `input` were taken. Nothing is taken while
    /// a frame is ready and not yet advanced.
    pub fn fill(&mut self, input: &[f32]) -> usize {
        let take = (self.frame_size - self.fill).min(input.len());
        let start = self.fill;
        let dest = &mut self.samples[start..start + take];

        if self.placement == WindowPlacement::Accumulate {
            for ((d, &x), &w) in dest.iter_mut().zip(input).zip(&self.window[start..]) {
                *d = x * w;
            }
        } else {
            dest.copy_from_slice(&input[..take]);
        }

        self.fill += take;
        take
    }

    /// Copy the current frame into `dest`, windowing it for transform-time placement
    pub fn copy_frame(&self, dest: &mut [f32]) {
        debug_assert!(self.is_ready());
        debug_assert_eq!(dest.len(), self.frame_size);

        if self.placement == WindowPlacement::Transform {
            for ((d, &x), &w) in dest.iter_mut().zip(&self.samples).zip(&self.window) {
                *d = x * w;
            }
        } else {
            dest.copy_from_slice(&self.samples);
        }
    }

    /// Drop the oldest hop and keep the newest `N - H` samples at the front
    pub fn advance(&mut self) {
        if !self.is_ready() {
            return;
        }
        self.samples.copy_within(self.hop_size.., 0);
        self.fill = self.frame_size - self.hop_size;
    }

    /// Clear all buffered samples
    pub fn reset(&mut self) {
        self.samples.fill(0.0);
        self.fill = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_rejects_invalid_hop() {
        assert!(WindowedFrameBuffer::new(FftSize::Tiny, 0, WindowPlacement::Transform).is_err());
        assert!(WindowedFrameBuffer::new(FftSize::Tiny, 257, WindowPlacement::Transform).is_err());
        assert!(WindowedFrameBuffer::new(FftSize::Tiny, 256, WindowPlacement::Transform).is_ok());
    }

    #[test]
    fn test_hann_window_shape() {
        let w = hann_window(256);
        assert_eq!(w[0], 0.0);
        assert!((w[128] - 1.0).abs() < 1e-6);
        assert!((w[64] - w[192]).abs() < 1e-6);
    }

    #[test]
    fn test_fill_stops_at_frame_boundary() {
        let mut fb = WindowedFrameBuffer::new(FftSize::Tiny, 64, WindowPlacement::Rectangular).unwrap();
        let input = ramp(300);

        assert_eq!(fb.fill(&input), 256);
        assert!(fb.is_ready());
        // Full frame takes nothing more until advanced
        assert_eq!(fb.fill(&input[256..]), 0);
    }

    #[test]
    fn test_advance_slides_by_hop() {
        let mut fb = WindowedFrameBuffer::new(FftSize::Tiny, 64, WindowPlacement::Rectangular).unwrap();
        let input = ramp(320);
        let mut frame = vec![0.0; 256];

        let taken = fb.fill(&input);
        fb.copy_frame(&mut frame);
        assert_eq!(frame[0], 0.0);
        fb.advance();
        assert_eq!(fb.buffered(), 192);
        assert_eq!(fb.overlap(), 192);

        assert_eq!(fb.fill(&input[taken..]), 64);
        assert!(fb.is_ready());
        fb.copy_frame(&mut frame);
        // Second frame starts one hop later, samples in order
        assert_eq!(frame[0], 64.0);
        assert_eq!(frame[255], 319.0);
    }

    #[test]
    fn test_blocks_yield_one_frame_per_hop() {
        let mut fb = WindowedFrameBuffer::new(FftSize::Tiny, 64, WindowPlacement::Transform).unwrap();
        let block = vec![0.25; 100];
        let mut frames = 0;

        for _ in 0..10 {
            let mut rest = &block[..];
            while !rest.is_empty() {
                let taken = fb.fill(rest);
                rest = &rest[taken..];
                if fb.is_ready() {
                    frames += 1;
                    fb.advance();
                }
            }
        }

        // 1000 samples: first frame at 256, then one per 64
        assert_eq!(frames, 1 + (1000 - 256) / 64);
    }

    #[test]
    fn test_window_placements() {
        let input = vec![1.0; 256];
        let window = hann_window(256);
        let mut frame = vec![0.0; 256];

        let mut at_transform = WindowedFrameBuffer::new(FftSize::Tiny, 256, WindowPlacement::Transform).unwrap();
        at_transform.fill(&input);
        at_transform.copy_frame(&mut frame);
        assert!((frame[100] - window[100]).abs() < 1e-6);

        let mut at_accumulate = WindowedFrameBuffer::new(FftSize::Tiny, 256, WindowPlacement::Accumulate).unwrap();
        at_accumulate.fill(&input);
        at_accumulate.copy_frame(&mut frame);
        assert!((frame[100] - window[100]).abs() < 1e-6);

        let mut rectangular = WindowedFrameBuffer::new(FftSize::Tiny, 256, WindowPlacement::Rectangular).unwrap();
        rectangular.fill(&input);
        rectangular.copy_frame(&mut frame);
        assert!(frame.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_accumulate_rejects_overlapping_frames() {
        let err = WindowedFrameBuffer::new(FftSize::Tiny, 64, WindowPlacement::Accumulate);
        assert!(matches!(
            err,
            Err(SpectralError::Config(ConfigError::OverlappedAccumulate { hop: 64, frame: 256 }))
        ));
    }

    #[test]
    fn test_accumulate_matches_transform_across_frames() {
        let input: Vec<f32> = (0..768).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut accumulate = WindowedFrameBuffer::new(FftSize::Tiny, 256, WindowPlacement::Accumulate).unwrap();
        let mut transform = WindowedFrameBuffer::new(FftSize::Tiny, 256, WindowPlacement::Transform).unwrap();
        let mut a = vec![0.0; 256];
        let mut t = vec![0.0; 256];
        let mut frames = 0;

        for block in input.chunks(100) {
            let (mut rest_a, mut rest_t) = (block, block);
            while !rest_a.is_empty() || !rest_t.is_empty() {
                rest_a = &rest_a[accumulate.fill(rest_a)..];
                rest_t = &rest_t[transform.fill(rest_t)..];
                if accumulate.is_ready() && transform.is_ready() {
                    accumulate.copy_frame(&mut a);
                    transform.copy_frame(&mut t);
                    for (x, y) in a.iter().zip(&t) {
                        assert!((x - y).abs() < 1e-6);
                    }
                    frames += 1;
                    accumulate.advance();
                    transform.advance();
                }
            }
        }
        assert_eq!(frames, 3);
    }

    #[test]
    fn test_reset_clears_fill() {
        let mut fb = WindowedFrameBuffer::new(FftSize::Tiny, 128, WindowPlacement::Transform).unwrap();
        fb.fill(&[1.0; 200]);
        fb.reset();
        assert_eq!(fb.buffered(), 0);
        assert!(!fb.is_ready());
    }
}
