//! Simple configuration persistence for Spectra
//!
//! Stores the default shifter and detector settings as `key=value` lines.
//! Command-line flags override whatever is loaded here.

use spectra_analysis::{DetectorConfig, DetectorKind, FftSize};
use spectra_dsp::{BoundaryPolicy, Overlap, ShiftParams};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Shifter frame size
    pub frame_size: FftSize,
    pub overlap: Overlap,
    pub shift: ShiftParams,
    pub detector: DetectorConfig,
    /// Host block length used when processing files
    pub block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_size: FftSize::Medium,
            overlap: Overlap::Direct,
            shift: ShiftParams::default(),
            detector: DetectorConfig::default(),
            block_size: 512,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::config_path();
        Self::load_from(&path).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spectra")
            .join("config.txt")
    }

    /// Parse config from simple key=value format
    ///
    /// The detector kind is applied first so that its defaults can be
    /// overridden by the other detector keys regardless of line order.
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();
        let entries: Vec<(&str, &str)> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();

        if let Some(&(_, value)) = entries.iter().rev().find(|(key, _)| *key == "detector") {
            match parse_detector_kind(value) {
                Some(kind) => config.detector = DetectorConfig::for_kind(kind),
                None => warn!(value, "ignoring unknown detector kind"),
            }
        }

        for (key, value) in entries {
            let applied = match key {
                "frame_size" => parse_frame_size(value).map(|v| config.frame_size = v),
                "overlap" => parse_overlap(value).map(|v| config.overlap = v),
                "pitch_scale" => parse_number(value).map(|v| config.shift.pitch_scale = v),
                "frequency_shift" => parse_number(value).map(|v| config.shift.frequency_shift = v),
                "clip" => parse_bool(value).map(|v| config.shift.boundary = BoundaryPolicy::from_clip(v)),
                "block_size" => parse_number(value)
                    .filter(|&v: &usize| v > 0)
                    .map(|v| config.block_size = v),
                "detector" => Some(()),
                "detector_frame_size" => parse_frame_size(value).map(|v| config.detector.frame_size = v),
                "hop_size" => parse_number(value).map(|v| config.detector.hop_size = v),
                "threshold" => parse_number(value).map(|v| config.detector.threshold = v),
                "smoothing" => parse_bool(value).map(|v| config.detector.smoothing = v),
                "smoother_length" => parse_number(value).map(|v| config.detector.smoother.iterations = v),
                "noise_covariance" => {
                    parse_number(value).map(|v| config.detector.smoother.noise_covariance = v)
                }
                "baseline" => parse_number(value).map(|v| config.detector.smoother.baseline = v),
                _ => Some(()), // Ignore unknown keys
            };

            if applied.is_none() {
                warn!(key, value, "ignoring invalid config value");
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    pub fn serialize(&self) -> String {
        let detector = &self.detector;
        let lines = [
            "# Spectra Configuration".to_string(),
            "# Shifter".to_string(),
            format!("frame_size={}", self.frame_size),
            format!("overlap={}", self.overlap.name()),
            format!("pitch_scale={}", self.shift.pitch_scale),
            format!("frequency_shift={}", self.shift.frequency_shift),
            format!("clip={}", self.shift.boundary.is_clip()),
            format!("block_size={}", self.block_size),
            "# Detector".to_string(),
            format!("detector={}", detector.kind.name()),
            format!("detector_frame_size={}", detector.frame_size),
            format!("hop_size={}", detector.hop_size),
            format!("threshold={}", detector.threshold),
            format!("smoothing={}", detector.smoothing),
            format!("smoother_length={}", detector.smoother.iterations),
            format!("noise_covariance={}", detector.smoother.noise_covariance),
            format!("baseline={}", detector.smoother.baseline),
        ];
        lines.join("\n")
    }
}

fn parse_number<T: FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn parse_frame_size(value: &str) -> Option<FftSize> {
    parse_number::<usize>(value).and_then(|n| FftSize::try_from(n).ok())
}

pub fn parse_overlap(value: &str) -> Option<Overlap> {
    match value {
        "direct" => Some(Overlap::Direct),
        "quad" => Some(Overlap::Quad),
        _ => None,
    }
}

pub fn parse_detector_kind(value: &str) -> Option<DetectorKind> {
    match value {
        "phase" => Some(DetectorKind::PhaseDeviation),
        "rms" => Some(DetectorKind::Rms),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(Config::parse(""), Config::default());
    }

    #[test]
    fn test_parse_shifter_keys() {
        let config = Config::parse("frame_size=2048\noverlap=quad\npitch_scale=1.5\nclip=true");
        assert_eq!(config.frame_size, FftSize::Large);
        assert_eq!(config.overlap, Overlap::Quad);
        assert_eq!(config.shift.pitch_scale, 1.5);
        assert_eq!(config.shift.boundary, BoundaryPolicy::Clip);
    }

    #[test]
    fn test_parse_with_comments() {
        let content = "# Comment\nthreshold = 0.25\n# Another comment";
        let config = Config::parse(content);
        assert_eq!(config.detector.threshold, 0.25);
    }

    #[test]
    fn test_detector_kind_applies_before_overrides() {
        let config = Config::parse("threshold=0.5\ndetector=rms");
        assert_eq!(config.detector.kind, DetectorKind::Rms);
        assert_eq!(config.detector.smoother.iterations, 20);
        assert_eq!(config.detector.threshold, 0.5);
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = Config::parse("frame_size=1000\nthreshold=loud\nblock_size=0\nunknown=1");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut config = Config::default();
        config.overlap = Overlap::Quad;
        config.shift.frequency_shift = -120.5;
        config.detector = DetectorConfig::rms();
        config.detector.threshold = 0.3;

        let parsed = Config::parse(&config.serialize());
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("spectra-config-{}", std::process::id()))
            .join("config.txt");
        let mut config = Config::default();
        config.block_size = 1024;

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        let _ = fs::remove_dir_all(path.parent().unwrap());

        assert_eq!(loaded, config);
    }
}
