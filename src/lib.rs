//! seqwave - Render sound sequences to WAV.
//!
//! This library provides the timing resolution, mixing and WAV codec
//! behind the `seqwave` command-line renderer.

pub mod audio;
pub mod sequence;
pub mod wav;

// Re-export commonly used types
pub use audio::{EncodeError, EncoderSettings, PcmEncoder, SampleLibrary, SampleProvider};
pub use sequence::{Event, EventKind, Placement, PlacementCalculator, Sequence, TimedEventSet};
pub use wav::{PcmHolder, SampleFormat, WavError};
