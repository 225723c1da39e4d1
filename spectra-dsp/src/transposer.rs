//! Spectral pitch and frequency shifter.
//!
//! Two resynthesis paths share the same remapper:
//!
//! - [`Overlap::Direct`]: one unwindowed transform per host block. The block
//!   must be exactly one frame long; anything else is passed through
//!   untouched. No added latency.
//! - [`Overlap::Quad`]: 75% overlapped Hann/Hann STFT with overlap-add.
//!   Accepts any block length and delays the signal by `N - 1` samples.

use crate::remap::{BinRemapper, BoundaryPolicy, ShiftParams};
use spectra_analysis::{
    alloc_buffer, hann_window, BlockStatus, ConfigError, FftSize, SpectralError,
    SpectralTransformEngine, WindowPlacement, WindowedFrameBuffer,
};
use tracing::debug;

/// Resynthesis strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overlap {
    /// One frame per block, rectangular window
    #[default]
    Direct,
    /// Hop of N/4 with Hann analysis and synthesis windows
    Quad,
}

impl Overlap {
    #[inline]
    pub fn hop_size(self, size: FftSize) -> usize {
        match self {
            Overlap::Direct => size.as_usize(),
            Overlap::Quad => size.as_usize() / 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Overlap::Direct => "direct",
            Overlap::Quad => "quad",
        }
    }
}

/// Squared Hann windows at hop N/4 sum to 1.5
const QUAD_GAIN: f32 = 1.0 / 1.5;

/// Transposer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransposerConfig {
    pub frame_size: FftSize,
    pub sample_rate: f32,
    pub shift: ShiftParams,
    pub overlap: Overlap,
}

impl Default for TransposerConfig {
    fn default() -> Self {
        Self {
            frame_size: FftSize::Medium,
            sample_rate: 48000.0,
            shift: ShiftParams::default(),
            overlap: Overlap::Direct,
        }
    }
}

/// Frame buffer, transform pair and remapper wired into a shifter
pub struct Transposer {
    config: TransposerConfig,
    frames: WindowedFrameBuffer,
    engine: SpectralTransformEngine,
    remapper: BinRemapper,
    /// Hann window pre-scaled by the overlap gain (Quad only)
    synthesis_window: Vec<f32>,
    /// One resynthesized frame
    frame_out: Vec<f32>,
    /// Overlap-add accumulator, circular over one frame
    accumulator: Vec<f32>,
    accumulator_pos: usize,
    /// Completed output samples (circular)
    output_buffer: Vec<f32>,
    output_pos: usize,
    output_available: usize,
}

impl Transposer {
    pub fn new(config: TransposerConfig) -> Result<Self, SpectralError> {
        let size = config.frame_size;
        let n = size.as_usize();
        let placement = match config.overlap {
            Overlap::Direct => WindowPlacement::Rectangular,
            Overlap::Quad => WindowPlacement::Transform,
        };

        let frames = WindowedFrameBuffer::new(size, config.overlap.hop_size(size), placement)?;
        let engine = SpectralTransformEngine::new(size)?;
        let remapper = BinRemapper::new(size, config.sample_rate, config.shift)?;

        let (synthesis_window, accumulator, output_buffer) = match config.overlap {
            Overlap::Direct => (Vec::new(), Vec::new(), Vec::new()),
            Overlap::Quad => {
                let mut window = alloc_buffer("synthesis window", n, 0.0)?;
                for (w, h) in window.iter_mut().zip(hann_window(n)) {
                    *w = h * QUAD_GAIN;
                }
                (
                    window,
                    alloc_buffer("overlap accumulator", n, 0.0)?,
                    alloc_buffer("output", n * 2, 0.0)?,
                )
            }
        };

        let mut transposer = Self {
            config,
            frames,
            engine,
            remapper,
            synthesis_window,
            frame_out: alloc_buffer("frame output", n, 0.0)?,
            accumulator,
            accumulator_pos: 0,
            output_buffer,
            output_pos: 0,
            output_available: 0,
        };
        transposer.reset();
        Ok(transposer)
    }

    /// Current configuration
    pub fn config(&self) -> TransposerConfig {
        TransposerConfig {
            shift: self.remapper.params(),
            sample_rate: self.remapper.sample_rate(),
            ..self.config
        }
    }

    #[inline]
    pub fn frame_size(&self) -> FftSize {
        self.config.frame_size
    }

    #[inline]
    pub fn overlap(&self) -> Overlap {
        self.config.overlap
    }

    /// Delay between input and output, in samples
    pub fn latency(&self) -> usize {
        match self.config.overlap {
            Overlap::Direct => 0,
            Overlap::Quad => self.config.frame_size.as_usize() - 1,
        }
    }

    /// Whether a block of `len` samples can be resynthesized
    pub fn accepts(&self, len: usize) -> bool {
        match self.config.overlap {
            Overlap::Direct => len == self.config.frame_size.as_usize(),
            Overlap::Quad => true,
        }
    }

    pub fn set_shift(&mut self, shift: ShiftParams) -> Result<(), ConfigError> {
        self.remapper.set_params(shift)
    }

    pub fn set_pitch_scale(&mut self, pitch_scale: f64) -> Result<(), ConfigError> {
        self.remapper.set_pitch_scale(pitch_scale)
    }

    /// Set the pitch scale as an interval in cents
    pub fn set_cents(&mut self, cents: f64) -> Result<(), ConfigError> {
        self.remapper.set_pitch_scale(ShiftParams::cents_to_scale(cents))
    }

    pub fn set_frequency_shift(&mut self, frequency_shift: f64) -> Result<(), ConfigError> {
        self.remapper.set_frequency_shift(frequency_shift)
    }

    pub fn set_boundary(&mut self, boundary: BoundaryPolicy) {
        debug!(clip = boundary.is_clip(), "boundary policy set");
        self.remapper.set_boundary(boundary);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), ConfigError> {
        self.remapper.set_sample_rate(sample_rate)?;
        self.config.sample_rate = sample_rate;
        Ok(())
    }

    /// Shift one host block from `input` into `output`.
    ///
    /// Blocks the current path cannot handle are copied through unchanged.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<BlockStatus, SpectralError> {
        if input.len() != output.len() || !self.accepts(input.len()) {
            passthrough(input, output);
            return Ok(BlockStatus::Passthrough);
        }

        match self.config.overlap {
            Overlap::Direct => self.process_direct(input, output)?,
            Overlap::Quad => self.process_overlapped(input, output)?,
        }
        Ok(BlockStatus::Processed)
    }

    fn process_direct(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), SpectralError> {
        self.frames.fill(input);
        self.transform_frame()?;
        self.engine.synthesize_into(output)
    }

    fn process_overlapped(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), SpectralError> {
        let mut offset = 0;
        while offset < input.len() {
            let taken = self.frames.fill(&input[offset..]);
            if self.frames.is_ready() {
                self.transform_frame()?;
                self.engine.synthesize_into(&mut self.frame_out)?;
                self.overlap_add();
            }

            for out in &mut output[offset..offset + taken] {
                *out = self.pop_sample().unwrap_or(0.0);
            }
            offset += taken;
        }
        Ok(())
    }

    /// Forward transform the ready frame and remap its spectrum
    fn transform_frame(&mut self) -> Result<(), SpectralError> {
        self.frames.copy_frame(self.engine.time_mut());
        self.frames.advance();
        self.engine.forward()?;
        self.remapper.remap(self.engine.spectrum_mut());
        Ok(())
    }

    /// Accumulate the windowed frame and release the hop it completes
    fn overlap_add(&mut self) {
        let n = self.accumulator.len();
        let hop = self.frames.hop_size();

        for (i, (&s, &w)) in self.frame_out.iter().zip(&self.synthesis_window).enumerate() {
            self.accumulator[(self.accumulator_pos + i) % n] += s * w;
        }

        for i in 0..hop {
            let idx = (self.accumulator_pos + i) % n;
            let sample = self.accumulator[idx];
            self.accumulator[idx] = 0.0;
            self.push_sample(sample);
        }
        self.accumulator_pos = (self.accumulator_pos + hop) % n;
    }

    #[inline]
    fn push_sample(&mut self, sample: f32) {
        let len = self.output_buffer.len();
        debug_assert!(self.output_available < len);
        let idx = (self.output_pos + self.output_available) % len;
        self.output_buffer[idx] = sample;
        self.output_available += 1;
    }

    #[inline]
    fn pop_sample(&mut self) -> Option<f32> {
        if self.output_available == 0 {
            return None;
        }
        let sample = self.output_buffer[self.output_pos];
        self.output_pos = (self.output_pos + 1) % self.output_buffer.len();
        self.output_available -= 1;
        Some(sample)
    }

    /// Clear all buffered audio; the overlapped path is re-primed with silence
    pub fn reset(&mut self) {
        self.frames.reset();
        self.accumulator.fill(0.0);
        self.accumulator_pos = 0;
        self.output_buffer.fill(0.0);
        self.output_pos = 0;
        self.output_available = self.latency();
    }
}

fn passthrough(input: &[f32], output: &mut [f32]) {
    let len = input.len().min(output.len());
    output[..len].copy_from_slice(&input[..len]);
    output[len..].fill(0.0);
}
