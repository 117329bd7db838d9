//! Resolved timeline types.
//!
//! A placement is one concrete occurrence of an event at an absolute
//! sample position. A timed event set bundles the placements of one or
//! more sequences against a shared timeline.

use super::event::{Event, EventKind};
use super::sequence::Sequence;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A resolved, sample-indexed occurrence of one sequence event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Absolute position in the rendered timeline, in timing samples.
    pub sample_index: u64,

    /// Index of the originating event within its sequence.
    /// Loop repetitions share the same index.
    pub sequence_index: u64,

    /// Index of the originating sequence within a timed event set.
    /// Always 0 for single-sequence timelines.
    pub source: usize,

    /// The event this placement was resolved from.
    pub event: Event,

    /// Whether the encoder acts on this placement.
    pub audible: bool,
}

impl Placement {
    /// Returns the sound id if this placement plays a sample.
    pub fn sound_id(&self) -> Option<&str> {
        match self.event.kind {
            EventKind::Sound if self.audible => self.event.sound_id.as_deref(),
            _ => None,
        }
    }

    /// Converts `sample_index` from `from_rate` to `to_rate`, rounding to
    /// the nearest sample.
    pub fn index_at_rate(&self, from_rate: u32, to_rate: u32) -> u64 {
        rescale_index(self.sample_index, from_rate, to_rate)
    }
}

/// Converts a sample position between two rates, rounding to nearest.
pub fn rescale_index(index: u64, from_rate: u32, to_rate: u32) -> u64 {
    if from_rate == to_rate || from_rate == 0 {
        return index;
    }
    let scaled = (index as u128 * to_rate as u128 * 2 + from_rate as u128) / (from_rate as u128 * 2);
    scaled.min(u64::MAX as u128) as u64
}

/// Several sequences resolved against one shared, time-sorted timeline.
///
/// `timing_sample_rate` is the unit of every `sample_index` in
/// `placements`. It is independent of the output rate, so one timeline can
/// be rendered at any rate without recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEventSet {
    /// Source sequences, indexed by `Placement::source`.
    pub sequences: Vec<Sequence>,

    /// Placements of every sequence, sorted by `sample_index`.
    pub placements: Vec<Placement>,

    /// Rate used for placement index math.
    pub timing_sample_rate: u32,
}

impl TimedEventSet {
    /// Returns the number of audible placements.
    pub fn audible_count(&self) -> usize {
        self.placements.iter().filter(|p| p.audible).count()
    }

    /// Returns the position of the last placement in timing samples.
    pub fn end_index(&self) -> u64 {
        self.placements
            .iter()
            .map(|p| p.sample_index)
            .max()
            .unwrap_or(0)
    }

    /// Returns the duration up to the last placement, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.timing_sample_rate == 0 {
            return 0.0;
        }
        self.end_index() as f64 / self.timing_sample_rate as f64
    }

    /// Returns a copy of the placements with indices converted to
    /// `output_rate`.
    pub fn placements_at_rate(&self, output_rate: u32) -> Vec<Placement> {
        self.placements
            .iter()
            .map(|p| Placement {
                sample_index: p.index_at_rate(self.timing_sample_rate, output_rate),
                ..p.clone()
            })
            .collect()
    }

    /// Saves the timeline to JSON for inspection.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Loads a timeline from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Saves the timeline to binary format.
    ///
    /// Uses bincode for compact serialization of the placement list.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails
    pub fn save_to_binary<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let data = bincode::serialize(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, data)
    }

    /// Loads a timeline from binary format.
    ///
    /// # Errors
    ///
    /// Returns error if file reading or parsing fails
    pub fn load_from_binary<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let data = fs::read(path)?;
        bincode::deserialize(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
