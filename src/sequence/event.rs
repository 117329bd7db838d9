//! Sequence event representation.
//!
//! An event is one step of a parsed sound sequence: a sound to play, a
//! control instruction (tempo, pause, combine), a marker, or an action
//! such as an individual cut. Every event shares the same set of common
//! fields; the variant only carries what is specific to it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How an event's `value` modifies the quantity it targets.
///
/// For sounds the target is the playback rate, for tempo events it is
/// the current BPM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueScale {
    /// The value is used as-is (absolute).
    #[default]
    None,
    /// The target is multiplied by the value.
    Times,
    /// The value is added to the target.
    Add,
    /// The target is divided by the value.
    Divide,
}

impl ValueScale {
    /// Applies the value to a base quantity.
    ///
    /// Returns None when the operation is undefined (division by zero)
    /// or the result is not finite.
    pub fn apply(self, base: f64, value: f64) -> Option<f64> {
        let result = match self {
            ValueScale::None => value,
            ValueScale::Times => base * value,
            ValueScale::Add => base + value,
            ValueScale::Divide => {
                if value == 0.0 {
                    return None;
                }
                base / value
            }
        };
        result.is_finite().then_some(result)
    }
}

/// The variant-specific part of an event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Plays the sample named by the event's `sound_id`.
    #[default]
    Sound,
    /// Changes the tempo for all subsequent events. Never audible.
    Tempo,
    /// Advances the cursor by `value` beats without playing anything.
    Pause,
    /// Starts the next event at the same position as the previous step.
    Combine,
    /// Named marker for external consumers. Never audible.
    Bookmark { name: String },
    /// End-of-timeline marker. Never audible.
    SequenceEnd,
    /// Fades out sounding instances of the listed sounds.
    /// An empty set cuts every sounding instance.
    IndividualCut {
        #[serde(default)]
        sound_ids: BTreeSet<String>,
        #[serde(default = "default_standard_mode")]
        standard_mode: bool,
    },
}

fn default_standard_mode() -> bool {
    true
}

fn default_volume() -> f64 {
    1.0
}

fn default_loop_count() -> u32 {
    1
}

/// A single step of a sound sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sample identifier, present only for sound events.
    #[serde(default)]
    pub sound_id: Option<String>,

    /// Pitch or tempo modifier, interpreted through `value_scale`.
    #[serde(default)]
    pub value: f64,

    /// How `value` modifies its target.
    #[serde(default)]
    pub value_scale: ValueScale,

    /// Linear gain. 1.0 is unity.
    #[serde(default = "default_volume")]
    pub volume: f64,

    /// Number of times this step repeats.
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,

    /// Stereo position from -1 (left) to 1 (right).
    #[serde(default)]
    pub pan: f32,

    /// Variant-specific data.
    #[serde(default)]
    pub kind: EventKind,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            sound_id: None,
            value: 0.0,
            value_scale: ValueScale::None,
            volume: default_volume(),
            loop_count: default_loop_count(),
            pan: 0.0,
            kind: EventKind::Sound,
        }
    }
}

impl Event {
    /// Creates a sound event at the base pitch and unity volume.
    ///
    /// # Examples
    ///
    /// ```
    /// use seqwave::sequence::Event;
    ///
    /// let kick = Event::sound("kick").with_volume(0.5);
    /// assert!(kick.is_audible());
    /// ```
    pub fn sound(sound_id: impl Into<String>) -> Self {
        Self {
            sound_id: Some(sound_id.into()),
            ..Self::default()
        }
    }

    /// Creates a tempo change event.
    pub fn tempo(value: f64, value_scale: ValueScale) -> Self {
        Self {
            value,
            value_scale,
            kind: EventKind::Tempo,
            ..Self::default()
        }
    }

    /// Creates a pause of `beats` beats.
    pub fn pause(beats: f64) -> Self {
        Self {
            value: beats,
            kind: EventKind::Pause,
            ..Self::default()
        }
    }

    /// Creates a combine event.
    pub fn combine() -> Self {
        Self {
            kind: EventKind::Combine,
            ..Self::default()
        }
    }

    /// Creates a named bookmark.
    pub fn bookmark(name: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Bookmark { name: name.into() },
            ..Self::default()
        }
    }

    /// Creates an explicit end-of-sequence marker.
    pub fn sequence_end() -> Self {
        Self {
            kind: EventKind::SequenceEnd,
            ..Self::default()
        }
    }

    /// Creates an individual cut of the given sounds.
    pub fn individual_cut<I, S>(sound_ids: I, standard_mode: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: EventKind::IndividualCut {
                sound_ids: sound_ids.into_iter().map(Into::into).collect(),
                standard_mode,
            },
            ..Self::default()
        }
    }

    /// Sets the pitch value and its scale.
    pub fn with_value(mut self, value: f64, value_scale: ValueScale) -> Self {
        self.value = value;
        self.value_scale = value_scale;
        self
    }

    /// Sets the linear gain.
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Sets the repeat count.
    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    /// Sets the stereo position.
    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    /// Returns true for events the encoder acts on: sounds with an id,
    /// and individual cuts.
    pub fn is_audible(&self) -> bool {
        match self.kind {
            EventKind::Sound => self.sound_id.is_some(),
            EventKind::IndividualCut { .. } => true,
            EventKind::Tempo
            | EventKind::Pause
            | EventKind::Combine
            | EventKind::Bookmark { .. }
            | EventKind::SequenceEnd => false,
        }
    }

    /// Returns true for markers that are always kept in the timeline,
    /// whether or not visual events are requested.
    pub fn is_marker(&self) -> bool {
        matches!(self.kind, EventKind::Bookmark { .. } | EventKind::SequenceEnd)
    }

    /// Checks the event's fields against its variant.
    ///
    /// # Returns
    ///
    /// A description of the first problem found, or None if the event is
    /// well formed.
    pub fn validate(&self) -> Option<String> {
        if !self.value.is_finite() {
            return Some(format!("value {} is not finite", self.value));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Some(format!("volume {} must be a non-negative number", self.volume));
        }
        if !self.pan.is_finite() || !(-1.0..=1.0).contains(&self.pan) {
            return Some(format!("pan {} is outside [-1, 1]", self.pan));
        }

        match &self.kind {
            EventKind::Sound => {
                if self.sound_id.as_deref().map_or(true, str::is_empty) {
                    return Some("sound event has no sound id".to_string());
                }
                if matches!(self.value_scale, ValueScale::Times | ValueScale::Divide)
                    && self.value <= 0.0
                {
                    return Some(format!(
                        "{:?} pitch requires a positive value, got {}",
                        self.value_scale, self.value
                    ));
                }
                None
            }
            kind => {
                if self.sound_id.is_some() {
                    return Some(format!("{} event carries a sound id", kind.name()));
                }
                match kind {
                    EventKind::Tempo => None,
                    EventKind::Pause if self.value < 0.0 => {
                        Some(format!("pause length {} is negative", self.value))
                    }
                    _ if self.value_scale != ValueScale::None => Some(format!(
                        "{} event does not accept value scale {:?}",
                        kind.name(),
                        self.value_scale
                    )),
                    _ => None,
                }
            }
        }
    }
}

impl EventKind {
    /// Short lowercase name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Sound => "sound",
            EventKind::Tempo => "tempo",
            EventKind::Pause => "pause",
            EventKind::Combine => "combine",
            EventKind::Bookmark { .. } => "bookmark",
            EventKind::SequenceEnd => "sequence end",
            EventKind::IndividualCut { .. } => "individual cut",
        }
    }
}
