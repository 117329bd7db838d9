//! Sample sources for rendering.
//!
//! The encoder only needs decoded PCM per sound id. How samples are
//! fetched or decoded is up to the provider; the library here covers the
//! common case of a directory of WAV files.

use super::buffer::AudioBuffer;
use crate::wav;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Decoded PCM for one sound at its native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    pub buffer: AudioBuffer<f32>,
    pub sample_rate: u32,
}

impl SampleData {
    /// Wraps a planar float buffer.
    pub fn new(buffer: AudioBuffer<f32>, sample_rate: u32) -> Self {
        Self {
            buffer,
            sample_rate,
        }
    }

    /// Wraps mono samples.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(AudioBuffer::from_channels(vec![samples]).unwrap_or_default(), sample_rate)
    }

    /// Returns the natural duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.buffer.frames() as f64 / self.sample_rate as f64
    }
}

/// Read-only source of decoded samples, shared by all render workers.
pub trait SampleProvider: Sync {
    /// Returns the PCM for `sound_id`, or None if the sound is unknown.
    fn try_get_pcm(&self, sound_id: &str) -> Option<&SampleData>;
}

/// In-memory sample library keyed by sound id.
#[derive(Debug, Clone, Default)]
pub struct SampleLibrary {
    samples: HashMap<String, SampleData>,
}

impl SampleLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a sound.
    pub fn insert(&mut self, sound_id: impl Into<String>, data: SampleData) {
        self.samples.insert(sound_id.into(), data);
    }

    /// Returns the number of loaded sounds.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if no sounds are loaded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns true if `sound_id` is loaded.
    pub fn contains(&self, sound_id: &str) -> bool {
        self.samples.contains_key(sound_id)
    }

    /// Loads `<dir>/<sound>.wav` for each requested sound not already in
    /// the library.
    ///
    /// Files are decoded in parallel. Missing or unreadable files are
    /// logged and skipped; the encoder substitutes silence for them.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory holding one WAV file per sound
    /// * `sounds` - Sound ids to load, typically `Sequence::used_sounds`
    ///
    /// # Returns
    ///
    /// The sound ids that could not be loaded
    pub fn load_directory<P: AsRef<Path>>(
        &mut self,
        dir: P,
        sounds: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        let dir = dir.as_ref();
        let wanted: Vec<&String> = sounds.iter().filter(|s| !self.contains(s)).collect();

        let loaded: Vec<(&String, Option<SampleData>)> = wanted
            .into_par_iter()
            .map(|sound_id| {
                let path = dir.join(format!("{sound_id}.wav"));
                if !path.exists() {
                    tracing::warn!(sound = %sound_id, path = %path.display(), "sample file not found");
                    return (sound_id, None);
                }
                match wav::read_file(&path) {
                    Ok(pcm) => (
                        sound_id,
                        Some(SampleData::new(pcm.to_f32(), pcm.sample_rate)),
                    ),
                    Err(e) => {
                        tracing::warn!(
                            sound = %sound_id,
                            path = %path.display(),
                            "failed to decode sample: {}",
                            e
                        );
                        (sound_id, None)
                    }
                }
            })
            .collect();

        let mut missing = BTreeSet::new();
        for (sound_id, data) in loaded {
            match data {
                Some(data) => self.insert(sound_id.clone(), data),
                None => {
                    missing.insert(sound_id.clone());
                }
            }
        }

        tracing::debug!(
            loaded = self.samples.len(),
            missing = missing.len(),
            dir = %dir.display(),
            "loaded sample directory"
        );
        missing
    }
}

impl SampleProvider for SampleLibrary {
    fn try_get_pcm(&self, sound_id: &str) -> Option<&SampleData> {
        self.samples.get(sound_id)
    }
}

impl<P: SampleProvider + ?Sized> SampleProvider for &P {
    fn try_get_pcm(&self, sound_id: &str) -> Option<&SampleData> {
        (**self).try_get_pcm(sound_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::{PcmHolder, SampleFormat};

    #[test]
    fn test_library_lookup() {
        let mut library = SampleLibrary::new();
        library.insert("kick", SampleData::mono(vec![0.5; 100], 44100));
        assert_eq!(library.len(), 1);
        assert_eq!(library.try_get_pcm("kick").unwrap().buffer.frames(), 100);
        assert!(library.try_get_pcm("snare").is_none());
    }

    #[test]
    fn test_load_directory() {
        let dir = std::env::temp_dir().join("seqwave_library_test");
        std::fs::create_dir_all(&dir).unwrap();

        let buffer = AudioBuffer::from_channels(vec![vec![0.25f32; 32]]).unwrap();
        let holder = PcmHolder::from_f32(&buffer, 22050, SampleFormat::Float32);
        wav::write_file(dir.join("kick.wav"), &holder).unwrap();
        std::fs::write(dir.join("broken.wav"), b"not a wav file").unwrap();

        let sounds: BTreeSet<String> = ["kick", "broken", "absent"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut library = SampleLibrary::new();
        let missing = library.load_directory(&dir, &sounds);

        assert_eq!(
            missing.into_iter().collect::<Vec<_>>(),
            vec!["absent".to_string(), "broken".to_string()]
        );
        let kick = library.try_get_pcm("kick").unwrap();
        assert_eq!(kick.sample_rate, 22050);
        assert_eq!(kick.buffer, buffer);

        std::fs::remove_dir_all(dir).unwrap();
    }
}
