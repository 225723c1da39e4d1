//! Spectra - offline host for the spectral engine
//!
//! Decodes an audio file, feeds it block by block through the engine and
//! either prints detected onsets or writes the shifted signal to a WAV file.

mod config;
mod loader;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::bounded;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spectra_analysis::{DetectorConfig, DetectorKind, FftSize};
use spectra_dsp::{
    BoundaryPolicy, EngineConfig, EngineState, Overlap, ShiftParams, SpectralCommand,
    SpectralEngine, SpectralEvent, TransposerConfig,
};

use config::Config;
use loader::LoadedAudio;

#[derive(Parser, Debug)]
#[command(name = "spectra", version, about = "Spectral pitch shifting and onset detection")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host block length in samples
    #[arg(long, global = true)]
    block_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print detected onsets with timestamps
    Onsets(OnsetArgs),
    /// Pitch or frequency shift a file into a WAV file
    Shift(ShiftArgs),
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args, Debug)]
struct OnsetArgs {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    input: PathBuf,

    /// Detection function
    #[arg(short, long, value_enum)]
    detector: Option<DetectorArg>,

    /// Onset threshold
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Analysis frame size (256-4096)
    #[arg(long)]
    frame_size: Option<usize>,

    /// Samples between analysis frames
    #[arg(long)]
    hop: Option<usize>,

    /// Smooth detection values before thresholding
    #[arg(long)]
    smoothing: Option<bool>,

    /// Smoother history length (1-100)
    #[arg(long)]
    smoother_length: Option<usize>,

    /// Smoother measurement noise covariance
    #[arg(long)]
    noise_covariance: Option<f64>,

    /// Calibrate the smoother on the first N seconds
    #[arg(long)]
    calibrate: Option<f64>,

    /// Print every detection value, not only onsets
    #[arg(long)]
    values: bool,
}

#[derive(Args, Debug)]
struct ShiftArgs {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    input: PathBuf,

    /// Output WAV file
    #[arg(short, long, default_value = "shifted.wav")]
    output: PathBuf,

    /// Frequency multiplier
    #[arg(short, long, conflicts_with = "cents")]
    scale: Option<f64>,

    /// Pitch interval in cents
    #[arg(short, long, allow_hyphen_values = true)]
    cents: Option<f64>,

    /// Offset in Hz added after scaling
    #[arg(long, allow_hyphen_values = true)]
    shift_hz: Option<f64>,

    /// Pin out-of-range bins to DC/Nyquist instead of dropping them
    #[arg(long)]
    clip: bool,

    /// Transform size (256-4096)
    #[arg(long)]
    frame_size: Option<usize>,

    /// Resynthesis path
    #[arg(long, value_enum)]
    overlap: Option<OverlapArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DetectorArg {
    Phase,
    Rms,
}

impl From<DetectorArg> for DetectorKind {
    fn from(arg: DetectorArg) -> Self {
        match arg {
            DetectorArg::Phase => DetectorKind::PhaseDeviation,
            DetectorArg::Rms => DetectorKind::Rms,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OverlapArg {
    Direct,
    Quad,
}

impl From<OverlapArg> for Overlap {
    fn from(arg: OverlapArg) -> Self {
        match arg {
            OverlapArg::Direct => Overlap::Direct,
            OverlapArg::Quad => Overlap::Quad,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => Config::load(),
    };
    if let Some(block_size) = cli.block_size {
        if block_size == 0 {
            bail!("block size must be at least 1");
        }
        config.block_size = block_size;
    }

    match cli.command {
        Command::Onsets(args) => run_onsets(config, args),
        Command::Shift(args) => run_shift(config, args),
        Command::Config { save } => {
            println!("{}", config.serialize());
            if save {
                let path = cli.config.unwrap_or_else(Config::config_path);
                config
                    .save_to(&path)
                    .with_context(|| format!("failed to write config {}", path.display()))?;
                info!(path = %path.display(), "config saved");
            }
            Ok(())
        }
    }
}

/// Detector settings from the config file with command-line overrides applied
fn detector_config(config: &Config, args: &OnsetArgs) -> anyhow::Result<DetectorConfig> {
    let mut detector = match args.detector {
        Some(kind) => DetectorConfig::for_kind(kind.into()),
        None => config.detector,
    };
    if let Some(size) = args.frame_size {
        detector.frame_size = FftSize::try_from(size)?;
    }
    if let Some(hop) = args.hop {
        detector.hop_size = hop;
    }
    if let Some(threshold) = args.threshold {
        detector.threshold = threshold;
    }
    if let Some(smoothing) = args.smoothing {
        detector.smoothing = smoothing;
    }
    if let Some(len) = args.smoother_length {
        detector.smoother.iterations = len;
    }
    if let Some(r) = args.noise_covariance {
        detector.smoother.noise_covariance = r;
    }

    // Calibration observes the smoother input
    if args.calibrate.is_some() && !detector.smoothing {
        if args.smoothing == Some(false) {
            bail!("--calibrate needs smoothing, but --smoothing false was given");
        }
        warn!("calibration needs smoothing; enabling it");
        detector.smoothing = true;
    }
    Ok(detector)
}

fn run_onsets(config: Config, args: OnsetArgs) -> anyhow::Result<()> {
    let detector = detector_config(&config, &args)?;

    let audio = load_audio(&args.input)?;
    let block_size = config.block_size.min(detector.frame_size.as_usize());
    let engine_config = EngineConfig {
        sample_rate: audio.sample_rate as f32,
        shifter: None,
        detector: Some(detector),
    };

    let calibrate_blocks = args
        .calibrate
        .map(|secs| ((secs * audio.sample_rate as f64) as usize / block_size).max(1));
    let sample_rate = audio.sample_rate as f64;
    let mut onsets = 0usize;

    run_engine(&audio.samples, engine_config, block_size, calibrate_blocks, |event| {
        match event {
            SpectralEvent::Onset { frame, value } => {
                onsets += 1;
                let secs = frame_time(&detector, block_size, frame) / sample_rate;
                println!("{:>10.3}s  onset  {:.4}", secs, value);
            }
            SpectralEvent::Detection { frame, raw, value } if args.values => {
                let secs = frame_time(&detector, block_size, frame) / sample_rate;
                println!("{:>10.3}s  value  {:.4}  (raw {:.4})", secs, value, raw);
            }
            SpectralEvent::Calibrated(c) => info!(
                mean = c.mean,
                std_dev = c.std_dev,
                noise_covariance = c.noise_covariance,
                "calibrated"
            ),
            _ => {}
        }
    })?;

    info!(onsets, detector = detector.kind.name(), "done");
    Ok(())
}

/// Sample position a detection value refers to: frame centre or block start
fn frame_time(detector: &DetectorConfig, block_size: usize, frame: u64) -> f64 {
    match detector.kind {
        DetectorKind::PhaseDeviation => {
            (frame as usize * detector.hop_size + detector.frame_size.half()) as f64
        }
        DetectorKind::Rms => (frame as usize * block_size) as f64,
    }
}

fn run_shift(config: Config, args: ShiftArgs) -> anyhow::Result<()> {
    let mut shift = config.shift;
    if let Some(scale) = args.scale {
        shift.pitch_scale = scale;
    }
    if let Some(cents) = args.cents {
        shift.pitch_scale = ShiftParams::cents_to_scale(cents);
    }
    if let Some(hz) = args.shift_hz {
        shift.frequency_shift = hz;
    }
    if args.clip {
        shift.boundary = BoundaryPolicy::Clip;
    }
    let frame_size = match args.frame_size {
        Some(size) => FftSize::try_from(size)?,
        None => config.frame_size,
    };
    let overlap = args.overlap.map(Overlap::from).unwrap_or(config.overlap);

    let audio = load_audio(&args.input)?;
    let shifter = TransposerConfig {
        frame_size,
        sample_rate: audio.sample_rate as f32,
        shift,
        overlap,
    };
    // The direct path only accepts whole frames
    let block_size = match overlap {
        Overlap::Direct => frame_size.as_usize(),
        Overlap::Quad => config.block_size,
    };
    let latency = match overlap {
        Overlap::Direct => 0,
        Overlap::Quad => frame_size.as_usize() - 1,
    };

    // Flush the overlapped path with trailing silence
    let mut input = audio.samples.clone();
    input.resize(audio.samples.len() + latency, 0.0);

    let engine_config = EngineConfig {
        sample_rate: audio.sample_rate as f32,
        shifter: Some(shifter),
        detector: None,
    };
    let output = run_engine(&input, engine_config, block_size, None, |_| {})?;
    let shifted = &output[latency..latency + audio.samples.len()];

    loader::write_wav(&args.output, shifted, audio.sample_rate)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    info!(
        output = %args.output.display(),
        pitch_scale = shift.pitch_scale,
        frequency_shift = shift.frequency_shift,
        overlap = overlap.name(),
        "shifted"
    );
    Ok(())
}

fn load_audio(path: &Path) -> anyhow::Result<LoadedAudio> {
    let audio = loader::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    info!(
        title = %audio.title,
        sample_rate = audio.sample_rate,
        channels = audio.channels,
        duration_secs = audio.duration_secs(),
        "loaded"
    );
    Ok(audio)
}

/// Feed `samples` through a fresh engine in blocks of `block_size`.
///
/// The last block is zero-padded to full length. Returns the engine output,
/// as long as the padded input.
fn run_engine(
    samples: &[f32],
    config: EngineConfig,
    block_size: usize,
    calibrate_blocks: Option<usize>,
    mut on_event: impl FnMut(SpectralEvent),
) -> anyhow::Result<Vec<f32>> {
    // Room for every event one block can produce
    let (cmd_tx, cmd_rx) = bounded(16);
    let (evt_tx, evt_rx) = bounded(block_size * 2 + 16);
    let engine = SpectralEngine::new(cmd_tx, evt_rx);
    let mut state = EngineState::new(config, evt_tx)?;

    let padded_len = samples.len().div_ceil(block_size) * block_size;
    let mut input = samples.to_vec();
    input.resize(padded_len, 0.0);
    let mut output = vec![0.0; padded_len];

    if calibrate_blocks.is_some() {
        engine.send(SpectralCommand::SetCalibration(true));
    }

    for (index, (block_in, block_out)) in input
        .chunks(block_size)
        .zip(output.chunks_mut(block_size))
        .enumerate()
    {
        if calibrate_blocks == Some(index) {
            engine.send(SpectralCommand::SetCalibration(false));
        }
        if !state.drain_commands(&cmd_rx) {
            break;
        }

        state.process(block_in, block_out)?;
        for event in engine.drain_events() {
            on_event(event);
        }
    }

    engine.shutdown();
    state.drain_commands(&cmd_rx);
    for event in engine.drain_events() {
        on_event(event);
    }

    output.truncate(samples.len());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onset_args(extra: &[&str]) -> OnsetArgs {
        let argv = ["spectra", "onsets", "in.wav"].iter().chain(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Onsets(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_overrides_apply_to_detector() {
        let args = onset_args(&["-d", "rms", "-t", "0.3", "--smoother-length", "12"]);
        let detector = detector_config(&Config::default(), &args).unwrap();

        assert_eq!(detector.kind, DetectorKind::Rms);
        assert_eq!(detector.threshold, 0.3);
        assert_eq!(detector.smoother.iterations, 12);
        assert!(detector.smoothing);
    }

    #[test]
    fn test_calibrate_enables_smoothing() {
        let plain = detector_config(&Config::default(), &onset_args(&[])).unwrap();
        assert!(!plain.smoothing);

        let args = onset_args(&["--calibrate", "2.5"]);
        let detector = detector_config(&Config::default(), &args).unwrap();
        assert!(detector.smoothing);
    }

    #[test]
    fn test_calibrate_with_smoothing_off_is_rejected() {
        let args = onset_args(&["--calibrate", "1", "--smoothing", "false"]);
        assert!(detector_config(&Config::default(), &args).is_err());
    }

    #[test]
    fn test_invalid_frame_size_is_rejected() {
        let args = onset_args(&["--frame-size", "1000"]);
        assert!(detector_config(&Config::default(), &args).is_err());
    }
}
