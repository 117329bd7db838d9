//! Sequence data structures and timing resolution.
//!
//! This module provides the typed form of a parsed sound sequence and the
//! placement calculator that turns it into a sample-indexed timeline.

mod calculator;
mod event;
mod placement;
#[allow(clippy::module_inception)]
mod sequence;

pub use calculator::{BatchLayout, PlacementCalculator, SequenceError, DEFAULT_TEMPO};
pub use event::{Event, EventKind, ValueScale};
pub use placement::{rescale_index, Placement, TimedEventSet};
pub use sequence::Sequence;

/// Converts a duration in milliseconds to a sample count at `sample_rate`,
/// rounding to the nearest sample.
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> u64 {
    (ms as u64 * sample_rate as u64 + 500) / 1000
}

/// Converts a sample count to seconds.
pub fn samples_to_seconds(samples: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / sample_rate as f64
}
