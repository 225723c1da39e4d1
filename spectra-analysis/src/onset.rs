//! Onset detection pipeline.
//!
//! A [`DetectionFunction`] turns host blocks into control-rate scalars (one
//! per hop for the phase-deviation path, one per block for the RMS path).
//! [`OnsetDetector`] optionally runs each scalar through a
//! [`RecursiveSmoother`] and compares it against the threshold.

use crate::error::{ensure_finite, ConfigError, SpectralError};
use crate::frame::{WindowPlacement, WindowedFrameBuffer};
use crate::phase::PhaseDeviationDetector;
use crate::rms::RmsDetector;
use crate::smoother::{Calibration, RecursiveSmoother, SmootherConfig};
use crate::transform::{FftSize, SpectralTransformEngine};
use tracing::debug;

/// Trait for detection functions feeding the onset pipeline
pub trait DetectionFunction: Send {
    /// Consume one host block, calling `emit` once per detection value produced
    fn process_block(
        &mut self,
        block: &[f32],
        emit: &mut dyn FnMut(f32),
    ) -> Result<(), SpectralError>;

    /// Longest block accepted in one call
    fn max_block(&self) -> usize;

    /// Forget all history
    fn reset(&mut self);

    /// Get detection function name
    fn name(&self) -> &'static str;
}

/// Streaming phase-deviation detection: frame buffer, forward transform, scorer
pub struct PhaseDeviationOnsets {
    frames: WindowedFrameBuffer,
    engine: SpectralTransformEngine,
    detector: PhaseDeviationDetector,
}

impl PhaseDeviationOnsets {
    pub fn new(
        size: FftSize,
        hop_size: usize,
        placement: WindowPlacement,
    ) -> Result<Self, SpectralError> {
        Ok(Self {
            frames: WindowedFrameBuffer::new(size, hop_size, placement)?,
            engine: SpectralTransformEngine::new(size)?,
            detector: PhaseDeviationDetector::new(size)?,
        })
    }
}

impl DetectionFunction for PhaseDeviationOnsets {
    fn process_block(
        &mut self,
        block: &[f32],
        emit: &mut dyn FnMut(f32),
    ) -> Result<(), SpectralError> {
        let mut rest = block;
        while !rest.is_empty() {
            let taken = self.frames.fill(rest);
            rest = &rest[taken..];

            if self.frames.is_ready() {
                self.frames.copy_frame(self.engine.time_mut());
                self.frames.advance();
                self.engine.forward()?;
                emit(self.detector.evaluate(self.engine.spectrum()));
            }
        }
        Ok(())
    }

    fn max_block(&self) -> usize {
        self.frames.frame_size()
    }

    fn reset(&mut self) {
        self.frames.reset();
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "phase deviation"
    }
}

/// Block-rate RMS change detection
pub struct RmsOnsets {
    detector: RmsDetector,
    max_block: usize,
}

impl RmsOnsets {
    pub fn new(max_block: usize) -> Self {
        Self {
            detector: RmsDetector::new(),
            max_block,
        }
    }
}

impl DetectionFunction for RmsOnsets {
    fn process_block(
        &mut self,
        block: &[f32],
        emit: &mut dyn FnMut(f32),
    ) -> Result<(), SpectralError> {
        if !block.is_empty() {
            emit(self.detector.evaluate(block));
        }
        Ok(())
    }

    fn max_block(&self) -> usize {
        self.max_block
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "rms"
    }
}

/// Which detection function feeds the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorKind {
    /// Frequency-domain phase deviation, one value per hop
    #[default]
    PhaseDeviation,
    /// Time-domain RMS change, one value per block
    Rms,
}

impl DetectorKind {
    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::PhaseDeviation => "phase",
            DetectorKind::Rms => "rms",
        }
    }
}

/// Onset pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    /// Analysis frame size; for the RMS path, the longest accepted block
    pub frame_size: FftSize,
    /// Samples between frames (phase path only)
    pub hop_size: usize,
    /// Where the Hann window is applied (phase path only)
    pub placement: WindowPlacement,
    pub threshold: f32,
    /// Run detection values through the smoother before thresholding
    pub smoothing: bool,
    pub smoother: SmootherConfig,
}

impl DetectorConfig {
    /// 2048-point frames every 256 samples, unsmoothed, threshold 0.1
    pub fn phase_deviation() -> Self {
        Self {
            kind: DetectorKind::PhaseDeviation,
            frame_size: FftSize::Large,
            hop_size: 256,
            placement: WindowPlacement::Transform,
            threshold: 0.1,
            smoothing: false,
            smoother: SmootherConfig::default(),
        }
    }

    /// Blocks up to 4096 samples, smoothed over 20 values with R = 2
    pub fn rms() -> Self {
        Self {
            kind: DetectorKind::Rms,
            frame_size: FftSize::Huge,
            hop_size: FftSize::Huge.as_usize(),
            placement: WindowPlacement::Rectangular,
            threshold: 0.02,
            smoothing: true,
            smoother: SmootherConfig {
                iterations: 20,
                noise_covariance: 2.0,
                baseline: 0.0,
            },
        }
    }

    pub fn for_kind(kind: DetectorKind) -> Self {
        match kind {
            DetectorKind::PhaseDeviation => Self::phase_deviation(),
            DetectorKind::Rms => Self::rms(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_finite("threshold", self.threshold as f64)?;
        if self.kind == DetectorKind::PhaseDeviation
            && (self.hop_size == 0 || self.hop_size > self.frame_size.as_usize())
        {
            return Err(ConfigError::InvalidHopSize {
                hop: self.hop_size,
                frame: self.frame_size.as_usize(),
            });
        }
        if self.kind == DetectorKind::PhaseDeviation
            && self.placement == WindowPlacement::Accumulate
            && self.hop_size < self.frame_size.as_usize()
        {
            return Err(ConfigError::OverlappedAccumulate {
                hop: self.hop_size,
                frame: self.frame_size.as_usize(),
            });
        }
        self.smoother.validate()
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::phase_deviation()
    }
}

/// Control-rate output of the onset pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionEvent {
    /// One detection value: `raw` from the function, `value` after smoothing
    Detection { frame: u64, raw: f32, value: f32 },
    /// `value` exceeded the threshold
    Onset { frame: u64, value: f32 },
}

/// What happened to one host block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Processed normally
    Processed,
    /// Not analysed: the block was longer than the detector accepts
    Skipped,
    /// Copied through unmodified: the block did not match the frame size
    Passthrough,
}

/// Detection function, smoother and threshold
pub struct OnsetDetector {
    config: DetectorConfig,
    function: Box<dyn DetectionFunction>,
    smoother: RecursiveSmoother,
    frame: u64,
}

impl OnsetDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, SpectralError> {
        config.validate()?;
        let smoother = RecursiveSmoother::new(config.smoother)?;
        let function = build_function(&config)?;

        Ok(Self {
            config,
            function,
            smoother,
            frame: 0,
        })
    }

    /// Current configuration, with live smoother parameters
    pub fn config(&self) -> DetectorConfig {
        DetectorConfig {
            smoother: self.smoother.config(),
            ..self.config
        }
    }

    #[inline]
    pub fn kind(&self) -> DetectorKind {
        self.config.kind
    }

    #[inline]
    pub fn frame_size(&self) -> FftSize {
        self.config.frame_size
    }

    #[inline]
    pub fn max_block(&self) -> usize {
        self.function.max_block()
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.config.threshold
    }

    /// Detection values produced so far
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frame
    }

    pub fn smoother(&self) -> &RecursiveSmoother {
        &self.smoother
    }

    pub fn smoother_mut(&mut self) -> &mut RecursiveSmoother {
        &mut self.smoother
    }

    /// Analyse one block, passing every detection and onset to `sink`
    pub fn process(
        &mut self,
        block: &[f32],
        sink: &mut dyn FnMut(DetectionEvent),
    ) -> Result<BlockStatus, SpectralError> {
        if block.len() > self.function.max_block() {
            return Ok(BlockStatus::Skipped);
        }

        let threshold = self.config.threshold;
        let smoothing = self.config.smoothing;
        let smoother = &mut self.smoother;
        let frame = &mut self.frame;

        self.function.process_block(block, &mut |raw: f32| {
            let value = if smoothing {
                smoother.process(raw as f64) as f32
            } else {
                raw
            };

            sink(DetectionEvent::Detection {
                frame: *frame,
                raw,
                value,
            });
            // A zero score never triggers, whatever the smoother baseline
            if raw > 0.0 && value > threshold {
                sink(DetectionEvent::Onset { frame: *frame, value });
            }
            *frame += 1;
        })?;

        Ok(BlockStatus::Processed)
    }

    /// Set the onset threshold; non-finite values are rejected
    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), ConfigError> {
        ensure_finite("threshold", threshold as f64)?;
        debug!(threshold, "onset threshold set");
        self.config.threshold = threshold;
        Ok(())
    }

    pub fn set_smoothing(&mut self, smoothing: bool) {
        debug!(smoothing, "onset smoothing set");
        self.config.smoothing = smoothing;
    }

    /// Rebuild the detection function for a new frame size.
    ///
    /// The hop keeps its ratio to the frame size. Nothing changes on error.
    pub fn set_frame_size(&mut self, size: FftSize) -> Result<(), SpectralError> {
        let old = self.config.frame_size.as_usize();
        let hop_size = (self.config.hop_size * size.as_usize() / old).max(1);
        let config = DetectorConfig {
            frame_size: size,
            hop_size,
            ..self.config
        };

        self.function = build_function(&config)?;
        self.config = config;
        self.frame = 0;
        debug!(frame_size = %size, hop_size, function = self.function.name(), "detector rebuilt");
        Ok(())
    }

    pub fn start_calibration(&mut self) {
        self.smoother.start_calibration();
    }

    pub fn finish_calibration(&mut self) -> Option<Calibration> {
        self.smoother.finish_calibration()
    }

    /// Clear detection history and the smoother window
    pub fn reset(&mut self) {
        self.function.reset();
        self.smoother.reset();
        self.frame = 0;
    }
}

fn build_function(config: &DetectorConfig) -> Result<Box<dyn DetectionFunction>, SpectralError> {
    Ok(match config.kind {
        DetectorKind::PhaseDeviation => Box::new(PhaseDeviationOnsets::new(
            config.frame_size,
            config.hop_size,
            config.placement,
        )?),
        DetectorKind::Rms => Box::new(RmsOnsets::new(config.frame_size.as_usize())),
    })
}
