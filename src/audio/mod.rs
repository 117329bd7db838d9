//! Sample rendering for resolved sequences.
//!
//! This module turns a placement timeline into PCM audio. It provides:
//! - Planar audio buffers and sample conversions
//! - Pluggable resampling strategies
//! - The sample provider boundary and an in-memory sample library
//! - The multithreaded mixing encoder
//! - WAV export helpers

pub mod buffer;
pub mod encoder;
pub mod export;
pub mod provider;
pub mod resample;
pub mod settings;

pub use buffer::{AudioBuffer, Sample};
pub use encoder::{render, EncodeError, PcmEncoder, RenderObserver, RENDER_BLOCK_SIZE};
pub use export::{export_batch_to_wav, export_timeline_to_wav, export_to_wav, ExportSummary};
pub use provider::{SampleData, SampleLibrary, SampleProvider};
pub use resample::{Resampler, ResamplerStrategy};
pub use settings::{EncoderSettings, PitchMapping, DEFAULT_SAMPLE_RATE};
