//! Spectral engine - orchestrates the shifter and the onset detector

use crate::remap::{validate_sample_rate, BoundaryPolicy};
use crate::transposer::{Transposer, TransposerConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use spectra_analysis::{
    BlockStatus, Calibration, DetectionEvent, DetectorConfig, FftSize, OnsetDetector, SpectralError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Commands sent to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SpectralCommand {
    // Shifter
    SetPitchScale(f64),
    SetCents(f64),
    SetFrequencyShift(f64),
    SetClip(bool),
    SetFrameSize(usize),

    // Detector
    SetThreshold(f32),
    SetSmootherLength(usize),
    SetNoiseCovariance(f64),
    SetBaseline(f64),
    SetSmoothing(bool),
    SetDetectorFrameSize(usize),
    /// Start (true) or finish (false) smoother calibration
    SetCalibration(bool),

    // System
    SetSampleRate(f32),
    Reset,
    Shutdown,
}

/// Which processing path an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Shifter,
    Detector,
}

/// Events sent from the engine
#[derive(Debug, Clone, PartialEq)]
pub enum SpectralEvent {
    /// Detection value for one hop (or block on the RMS path)
    Detection { frame: u64, raw: f32, value: f32 },
    /// Detection value crossed the threshold
    Onset { frame: u64, value: f32 },
    /// A command was rejected; the previous configuration is still active
    ConfigRejected(String),
    /// Blocks are no longer processed normally on `stage`
    Degraded {
        stage: Stage,
        block_len: usize,
        frame_size: usize,
    },
    /// `stage` is processing normally again
    Recovered { stage: Stage },
    /// Smoother calibration finished
    Calibrated(Calibration),
}

impl From<DetectionEvent> for SpectralEvent {
    fn from(event: DetectionEvent) -> Self {
        match event {
            DetectionEvent::Detection { frame, raw, value } => {
                SpectralEvent::Detection { frame, raw, value }
            }
            DetectionEvent::Onset { frame, value } => SpectralEvent::Onset { frame, value },
        }
    }
}

/// Engine configuration; a `None` path is not built
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub shifter: Option<TransposerConfig>,
    pub detector: Option<DetectorConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            shifter: Some(TransposerConfig::default()),
            detector: Some(DetectorConfig::default()),
        }
    }
}

/// Engine state (held in the audio thread)
pub struct EngineState {
    sample_rate: f32,
    transposer: Option<Transposer>,
    detector: Option<OnsetDetector>,
    events: Sender<SpectralEvent>,
    shifter_degraded: bool,
    detector_degraded: bool,
    running: bool,
}

impl EngineState {
    /// Build every configured path. Nothing is returned if any part fails.
    pub fn new(config: EngineConfig, events: Sender<SpectralEvent>) -> Result<Self, SpectralError> {
        validate_sample_rate(config.sample_rate)?;

        let transposer = config
            .shifter
            .map(|shifter| {
                Transposer::new(TransposerConfig {
                    sample_rate: config.sample_rate,
                    ..shifter
                })
            })
            .transpose()?;
        let detector = config.detector.map(OnsetDetector::new).transpose()?;

        info!(
            sample_rate = config.sample_rate,
            shifter = transposer.is_some(),
            detector = detector.is_some(),
            "spectral engine ready"
        );

        Ok(Self {
            sample_rate: config.sample_rate,
            transposer,
            detector,
            events,
            shifter_degraded: false,
            detector_degraded: false,
            running: true,
        })
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn transposer(&self) -> Option<&Transposer> {
        self.transposer.as_ref()
    }

    pub fn detector(&self) -> Option<&OnsetDetector> {
        self.detector.as_ref()
    }

    /// False once a shutdown command has been handled
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Process a command.
    ///
    /// A rejected command leaves the configuration untouched, is reported
    /// through [`SpectralEvent::ConfigRejected`], and is returned here as well.
    pub fn handle_command(&mut self, cmd: SpectralCommand) -> Result<(), SpectralError> {
        let result = self.apply(cmd);
        if let Err(e) = &result {
            warn!(error = %e, "command rejected");
            self.emit(SpectralEvent::ConfigRejected(e.to_string()));
        }
        result
    }

    /// Handle every pending command. Returns false once shutdown was requested.
    pub fn drain_commands(&mut self, commands: &Receiver<SpectralCommand>) -> bool {
        while let Ok(cmd) = commands.try_recv() {
            // Errors are already reported as events
            let _ = self.handle_command(cmd);
            if !self.running {
                break;
            }
        }
        self.running
    }

    fn apply(&mut self, cmd: SpectralCommand) -> Result<(), SpectralError> {
        match cmd {
            // Shifter commands
            SpectralCommand::SetPitchScale(scale) => {
                if let Some(t) = self.transposer.as_mut() {
                    t.set_pitch_scale(scale)?;
                }
            }
            SpectralCommand::SetCents(cents) => {
                if let Some(t) = self.transposer.as_mut() {
                    t.set_cents(cents)?;
                }
            }
            SpectralCommand::SetFrequencyShift(shift) => {
                if let Some(t) = self.transposer.as_mut() {
                    t.set_frequency_shift(shift)?;
                }
            }
            SpectralCommand::SetClip(clip) => {
                if let Some(t) = self.transposer.as_mut() {
                    t.set_boundary(BoundaryPolicy::from_clip(clip));
                }
            }
            SpectralCommand::SetFrameSize(size) => {
                let size = FftSize::try_from(size)?;
                if let Some(current) = self.transposer.as_ref() {
                    // Built completely before the old one is dropped
                    let rebuilt = Transposer::new(TransposerConfig {
                        frame_size: size,
                        ..current.config()
                    })?;
                    self.transposer = Some(rebuilt);
                    self.shifter_degraded = false;
                    debug!(frame_size = %size, "shifter rebuilt");
                }
            }

            // Detector commands
            SpectralCommand::SetThreshold(threshold) => {
                if let Some(d) = self.detector.as_mut() {
                    d.set_threshold(threshold)?;
                }
            }
            SpectralCommand::SetSmootherLength(len) => {
                if let Some(d) = self.detector.as_mut() {
                    d.smoother_mut().set_iterations(len)?;
                }
            }
            SpectralCommand::SetNoiseCovariance(r) => {
                if let Some(d) = self.detector.as_mut() {
                    d.smoother_mut().set_noise_covariance(r)?;
                }
            }
            SpectralCommand::SetBaseline(baseline) => {
                if let Some(d) = self.detector.as_mut() {
                    d.smoother_mut().set_baseline(baseline)?;
                }
            }
            SpectralCommand::SetSmoothing(on) => {
                if let Some(d) = self.detector.as_mut() {
                    d.set_smoothing(on);
                }
            }
            SpectralCommand::SetDetectorFrameSize(size) => {
                let size = FftSize::try_from(size)?;
                if let Some(d) = self.detector.as_mut() {
                    d.set_frame_size(size)?;
                    self.detector_degraded = false;
                }
            }
            SpectralCommand::SetCalibration(true) => {
                if let Some(d) = self.detector.as_mut() {
                    d.start_calibration();
                }
            }
            SpectralCommand::SetCalibration(false) => {
                let calibration = self.detector.as_mut().and_then(|d| d.finish_calibration());
                if let Some(calibration) = calibration {
                    info!(
                        mean = calibration.mean,
                        noise_covariance = calibration.noise_covariance,
                        "smoother calibrated"
                    );
                    self.emit(SpectralEvent::Calibrated(calibration));
                }
            }

            // System
            SpectralCommand::SetSampleRate(sample_rate) => {
                validate_sample_rate(sample_rate)?;
                if let Some(t) = self.transposer.as_mut() {
                    t.set_sample_rate(sample_rate)?;
                }
                self.sample_rate = sample_rate;
            }
            SpectralCommand::Reset => self.reset(),
            SpectralCommand::Shutdown => {
                debug!("spectral engine shutting down");
                self.running = false;
            }
        }
        Ok(())
    }

    /// Process one host block.
    ///
    /// The detector analyses `input`; `output` receives the shifted signal,
    /// or a copy of `input` when no shifter is configured.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), SpectralError> {
        if let Some(detector) = self.detector.as_mut() {
            let events = &self.events;
            let status = detector.process(input, &mut |event: DetectionEvent| {
                let _ = events.try_send(event.into());
            })?;
            let frame_size = detector.max_block();
            self.track(Stage::Detector, status, input.len(), frame_size);
        }

        match self.transposer.as_mut() {
            Some(transposer) => {
                let status = transposer.process(input, output)?;
                let frame_size = transposer.frame_size().as_usize();
                self.track(Stage::Shifter, status, input.len(), frame_size);
            }
            None => {
                let len = input.len().min(output.len());
                output[..len].copy_from_slice(&input[..len]);
            }
        }
        Ok(())
    }

    /// Report degradation transitions once each way
    fn track(&mut self, stage: Stage, status: BlockStatus, block_len: usize, frame_size: usize) {
        let degraded = status != BlockStatus::Processed;
        let flag = match stage {
            Stage::Shifter => &mut self.shifter_degraded,
            Stage::Detector => &mut self.detector_degraded,
        };
        if degraded == *flag {
            return;
        }
        *flag = degraded;

        if degraded {
            warn!(?stage, ?status, block_len, frame_size, "block size mismatch");
            self.emit(SpectralEvent::Degraded {
                stage,
                block_len,
                frame_size,
            });
        } else {
            info!(?stage, block_len, "block size matches again");
            self.emit(SpectralEvent::Recovered { stage });
        }
    }

    /// Clear all signal history, keeping the configuration
    pub fn reset(&mut self) {
        if let Some(t) = self.transposer.as_mut() {
            t.reset();
        }
        if let Some(d) = self.detector.as_mut() {
            d.reset();
        }
        self.shifter_degraded = false;
        self.detector_degraded = false;
    }

    /// Never blocks; a full channel drops the event
    fn emit(&self, event: SpectralEvent) {
        let _ = self.events.try_send(event);
    }
}

/// Handle to communicate with the engine
pub struct SpectralEngine {
    /// Send commands to the audio thread
    pub command_tx: Sender<SpectralCommand>,
    /// Receive events from the audio thread
    pub event_rx: Receiver<SpectralEvent>,
    /// Shutdown flag
    shutdown: Arc<AtomicBool>,
}

impl SpectralEngine {
    /// Create channels for engine communication
    pub fn create_channels() -> (
        Sender<SpectralCommand>,
        Receiver<SpectralCommand>,
        Sender<SpectralEvent>,
        Receiver<SpectralEvent>,
    ) {
        let (cmd_tx, cmd_rx) = bounded(1024);
        let (evt_tx, evt_rx) = bounded(1024);
        (cmd_tx, cmd_rx, evt_tx, evt_rx)
    }

    /// Create a new engine handle
    pub fn new(command_tx: Sender<SpectralCommand>, event_rx: Receiver<SpectralEvent>) -> Self {
        Self {
            command_tx,
            event_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send a command to the engine; dropped if the queue is full
    pub fn send(&self, cmd: SpectralCommand) {
        let _ = self.command_tx.try_send(cmd);
    }

    /// Next pending event, if any
    pub fn try_recv(&self) -> Option<SpectralEvent> {
        self.event_rx.try_recv().ok()
    }

    /// All pending events
    pub fn drain_events(&self) -> impl Iterator<Item = SpectralEvent> + '_ {
        self.event_rx.try_iter()
    }

    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.command_tx.try_send(SpectralCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_event_conversion() {
        let event = SpectralEvent::from(DetectionEvent::Onset { frame: 3, value: 0.5 });
        assert_eq!(event, SpectralEvent::Onset { frame: 3, value: 0.5 });
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        let (_, _, evt_tx, _) = SpectralEngine::create_channels();
        let config = EngineConfig {
            sample_rate: 0.0,
            ..EngineConfig::default()
        };
        assert!(EngineState::new(config, evt_tx).is_err());
    }

    #[test]
    fn test_shutdown_flag() {
        let (cmd_tx, cmd_rx, _, evt_rx) = SpectralEngine::create_channels();
        let engine = SpectralEngine::new(cmd_tx, evt_rx);
        assert!(!engine.is_shutdown());
        engine.shutdown();
        assert!(engine.is_shutdown());
        assert_eq!(cmd_rx.try_recv(), Ok(SpectralCommand::Shutdown));
    }
}
