//! Parsed sound sequence container.
//!
//! A sequence is the immutable output of the notation parser: an ordered
//! list of events plus the set of sounds it references, so the sample
//! library can be prefetched before rendering.

use super::event::{Event, EventKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// On-disk form of a sequence. Only the events are stored; everything
/// else is derived on load.
#[derive(Serialize, Deserialize)]
struct SequenceFile {
    events: Vec<Event>,
}

/// An ordered, immutable list of events.
///
/// Cloning is cheap: the event list is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SequenceFile", into = "SequenceFile")]
pub struct Sequence {
    events: Arc<[Event]>,
    used_sounds: BTreeSet<String>,
    modified: Option<SystemTime>,
}

impl From<SequenceFile> for Sequence {
    fn from(file: SequenceFile) -> Self {
        Self::new(file.events)
    }
}

impl From<Sequence> for SequenceFile {
    fn from(sequence: Sequence) -> Self {
        Self {
            events: sequence.events.to_vec(),
        }
    }
}

impl Sequence {
    /// Creates a sequence from parsed events.
    ///
    /// # Examples
    ///
    /// ```
    /// use seqwave::sequence::{Event, Sequence};
    ///
    /// let sequence = Sequence::new(vec![Event::sound("kick"), Event::sound("snare")]);
    /// assert_eq!(sequence.used_sounds().len(), 2);
    /// ```
    pub fn new(events: Vec<Event>) -> Self {
        let used_sounds = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Sound))
            .filter_map(|e| e.sound_id.clone())
            .collect();

        Self {
            events: events.into(),
            used_sounds,
            modified: None,
        }
    }

    /// Attaches the modification time of the source file.
    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Returns the events in order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the sequence has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns every distinct sound id played by the sequence.
    pub fn used_sounds(&self) -> &BTreeSet<String> {
        &self.used_sounds
    }

    /// Returns the modification time of the file this sequence was loaded
    /// from, if known. Diagnostic only.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Serializes the sequence to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a sequence from JSON.
    ///
    /// Accepts either `{"events": [...]}` or a bare event array.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<Self>(json) {
            Ok(sequence) => Ok(sequence),
            Err(err) => serde_json::from_str::<Vec<Event>>(json)
                .map(Self::new)
                .map_err(|_| err),
        }
    }

    /// Saves the sequence to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    /// Loads a sequence from a JSON file, recording its modification time.
    ///
    /// # Errors
    ///
    /// Returns error if file reading or parsing fails
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let sequence = Self::from_json(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => Ok(sequence.with_modified(modified)),
            Err(_) => Ok(sequence),
        }
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
