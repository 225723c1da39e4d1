//! Streaming spectral engine for Spectra
//!
//! This module provides the real-time processing paths:
//! - Remap: Bin remapping for pitch and frequency shifting
//! - Transposer: Direct or overlapped STFT resynthesis through the remapper
//! - Engine: Command/event plumbing around the shifter and onset detector

mod engine;
mod remap;
mod transposer;

pub use engine::{EngineConfig, EngineState, SpectralCommand, SpectralEngine, SpectralEvent, Stage};
pub use remap::{validate_sample_rate, BinRemapper, BoundaryPolicy, ShiftParams};
pub use transposer::{Overlap, Transposer, TransposerConfig};
