//! Placement calculation.
//!
//! Walks a sequence and resolves every event into absolute sample
//! positions, expanding loops and applying tempo changes as it goes.
//!
//! # Timing model
//!
//! The cursor advances in beats. One beat lasts
//! `timing_sample_rate * 60 / bpm` samples, starting at [`DEFAULT_TEMPO`].
//! Sound and cut steps advance the cursor by one beat per repetition,
//! pauses by `value` beats, and combine events rewind it to the start of
//! the previous step. The cursor is kept fractional and only rounded when
//! a placement is emitted, so long sequences do not drift.

use super::event::{Event, EventKind};
use super::placement::{Placement, TimedEventSet};
use super::sequence::Sequence;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tempo in beats per minute before any tempo event is seen.
pub const DEFAULT_TEMPO: f64 = 300.0;

/// Errors that can occur while resolving a sequence's timing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequenceError {
    /// An event's fields are inconsistent or its timing data is unusable.
    #[error("malformed sequence at event {index}: {reason}")]
    MalformedSequence { index: usize, reason: String },

    /// The timing sample rate cannot be used for index math.
    #[error("invalid timing sample rate: {0}")]
    InvalidTimingRate(u32),
}

/// How `calculate_many` lays out several sequences on one timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchLayout {
    /// Every sequence starts at sample 0 and plays simultaneously.
    #[default]
    Interleave,
    /// Each sequence starts where the previous one ended.
    Concatenate,
}

/// Resolves sequences into sample-indexed placements.
#[derive(Debug, Clone, Default)]
pub struct PlacementCalculator {
    /// Events closer than this to the previous audible placement share
    /// its sample index.
    pub combine_delay_ms: u32,

    /// Emit hidden placements for tempo, pause and combine events.
    /// Bookmarks and sequence ends are always emitted.
    pub add_visual_events: bool,

    /// Layout used by `calculate_many`.
    pub layout: BatchLayout,
}

/// Mutable walk state for a single sequence.
struct Cursor {
    /// Current position in fractional timing samples.
    position: f64,
    /// Position at which the last sound or cut step started.
    step_start: f64,
    /// Current tempo.
    bpm: f64,
    /// Samples per beat at the current tempo.
    beat_samples: f64,
    /// Sample index of the last audible placement, for combining.
    last_audible: Option<u64>,
}

impl PlacementCalculator {
    /// Creates a calculator with no combine window and no visual events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the combine window.
    pub fn with_combine_delay(mut self, combine_delay_ms: u32) -> Self {
        self.combine_delay_ms = combine_delay_ms;
        self
    }

    /// Enables or disables hidden control placements.
    pub fn with_visual_events(mut self, add_visual_events: bool) -> Self {
        self.add_visual_events = add_visual_events;
        self
    }

    /// Sets the batch layout.
    pub fn with_layout(mut self, layout: BatchLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Resolves a single sequence.
    ///
    /// # Arguments
    ///
    /// * `sequence` - The sequence to walk
    /// * `timing_sample_rate` - Unit of the resulting sample indices
    ///
    /// # Returns
    ///
    /// Placements sorted by `sample_index`, ending with a sequence-end
    /// marker.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSequence` naming the first invalid event.
    pub fn calculate(
        &self,
        sequence: &Sequence,
        timing_sample_rate: u32,
    ) -> Result<Vec<Placement>, SequenceError> {
        if timing_sample_rate == 0 {
            return Err(SequenceError::InvalidTimingRate(timing_sample_rate));
        }

        let rate = timing_sample_rate as f64;
        let combine_window = self.combine_delay_ms as f64 * rate / 1000.0;
        let mut cursor = Cursor {
            position: 0.0,
            step_start: 0.0,
            bpm: DEFAULT_TEMPO,
            beat_samples: rate * 60.0 / DEFAULT_TEMPO,
            last_audible: None,
        };
        let mut placements = Vec::with_capacity(sequence.len() + 1);
        let mut end_marker = None;

        for (index, event) in sequence.events().iter().enumerate() {
            if let Some(reason) = event.validate() {
                return Err(SequenceError::MalformedSequence { index, reason });
            }

            match &event.kind {
                EventKind::Sound | EventKind::IndividualCut { .. } => {
                    for _ in 0..event.loop_count {
                        let mut sample_index = cursor.position.round() as u64;
                        if let Some(previous) = cursor.last_audible {
                            if (sample_index.saturating_sub(previous) as f64) < combine_window {
                                sample_index = previous;
                            }
                        }
                        cursor.last_audible = Some(sample_index);
                        placements.push(Placement {
                            sample_index,
                            sequence_index: index as u64,
                            source: 0,
                            event: event.clone(),
                            audible: true,
                        });
                        cursor.step_start = cursor.position;
                        cursor.position += cursor.beat_samples;
                    }
                }
                EventKind::Tempo => {
                    for _ in 0..event.loop_count {
                        cursor.bpm = event
                            .value_scale
                            .apply(cursor.bpm, event.value)
                            .filter(|bpm| *bpm > 0.0)
                            .ok_or_else(|| SequenceError::MalformedSequence {
                                index,
                                reason: format!(
                                    "tempo {:?} {} from {} BPM is not a positive tempo",
                                    event.value_scale, event.value, cursor.bpm
                                ),
                            })?;
                    }
                    cursor.beat_samples = rate * 60.0 / cursor.bpm;
                    self.push_hidden(&mut placements, &cursor, index, event);
                }
                EventKind::Pause => {
                    self.push_hidden(&mut placements, &cursor, index, event);
                    cursor.position += event.value * cursor.beat_samples * event.loop_count as f64;
                }
                EventKind::Combine => {
                    cursor.position = cursor.step_start;
                    self.push_hidden(&mut placements, &cursor, index, event);
                }
                EventKind::Bookmark { .. } => {
                    placements.push(hidden(&cursor, index, event));
                }
                EventKind::SequenceEnd => {
                    end_marker = Some((index, event.clone()));
                    break;
                }
            }
        }

        let (end_index, end_event) =
            end_marker.unwrap_or_else(|| (sequence.len(), Event::sequence_end()));
        placements.push(hidden(&cursor, end_index, &end_event));

        // Snapped placements can land before hidden ones emitted earlier.
        placements.sort_by_key(|p| p.sample_index);

        tracing::debug!(
            events = sequence.len(),
            placements = placements.len(),
            end = cursor.position,
            "calculated placements"
        );

        Ok(placements)
    }

    /// Resolves several sequences onto one shared timeline.
    ///
    /// Each sequence keeps its own `sequence_index` numbering; placements
    /// are tagged with the index of their sequence in `source`. Ties on
    /// `sample_index` keep sequence order, then event order.
    ///
    /// # Errors
    ///
    /// Returns the first `MalformedSequence` error encountered.
    pub fn calculate_many(
        &self,
        sequences: &[Sequence],
        timing_sample_rate: u32,
    ) -> Result<TimedEventSet, SequenceError> {
        let mut all = Vec::new();
        let mut offset = 0u64;

        for (source, sequence) in sequences.iter().enumerate() {
            let placements = self.calculate(sequence, timing_sample_rate)?;
            let end = placements.iter().map(|p| p.sample_index).max().unwrap_or(0);
            let shift = match self.layout {
                BatchLayout::Interleave => 0,
                BatchLayout::Concatenate => offset,
            };

            all.extend(placements.into_iter().map(|p| Placement {
                sample_index: p.sample_index + shift,
                source,
                ..p
            }));
            offset += end;
        }

        all.sort_by_key(|p| p.sample_index);

        Ok(TimedEventSet {
            sequences: sequences.to_vec(),
            placements: all,
            timing_sample_rate,
        })
    }

    fn push_hidden(
        &self,
        placements: &mut Vec<Placement>,
        cursor: &Cursor,
        index: usize,
        event: &Event,
    ) {
        if self.add_visual_events {
            placements.push(hidden(cursor, index, event));
        }
    }
}

fn hidden(cursor: &Cursor, index: usize, event: &Event) -> Placement {
    Placement {
        sample_index: cursor.position.round() as u64,
        sequence_index: index as u64,
        source: 0,
        event: event.clone(),
        audible: false,
    }
}
