//! Encoder configuration.

use super::encoder::EncodeError;
use super::resample::ResamplerStrategy;
use crate::sequence::{BatchLayout, PlacementCalculator, ValueScale};
use crate::wav::SampleFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default output sample rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// How a sound event's `value` maps to a playback rate multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchMapping {
    /// `value` is a semitone offset for None/Add scales.
    #[default]
    Semitones,
    /// `value` is a percentage change of the base rate for None/Add.
    Percent,
}

impl PitchMapping {
    /// Returns the playback rate multiplier for a sound event.
    ///
    /// Times and Divide always treat `value` as a direct rate factor.
    /// Returns None if the resulting rate is not positive and finite.
    pub fn playback_rate(self, value: f64, scale: ValueScale) -> Option<f64> {
        let rate = match (self, scale) {
            (_, ValueScale::Times) => value,
            (_, ValueScale::Divide) if value != 0.0 => 1.0 / value,
            (_, ValueScale::Divide) => return None,
            (PitchMapping::Semitones, ValueScale::None | ValueScale::Add) => {
                2f64.powf(value / 12.0)
            }
            (PitchMapping::Percent, ValueScale::None | ValueScale::Add) => 1.0 + value / 100.0,
        };
        (rate.is_finite() && rate > 0.0).then_some(rate)
    }
}

fn default_slices() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Render configuration. Passed explicitly to every render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Output sample rate in Hz.
    pub sample_rate: u32,

    /// Output channel count (1 or 2).
    pub channels: u16,

    /// Length of the fade applied by individual cuts.
    pub cut_fade_length_ms: u32,

    /// Events closer than this share a sample index.
    pub combine_delay_ms: u32,

    /// Number of parallel mixing workers, each owning a disjoint range
    /// of the output.
    pub multithreading_slices: u32,

    /// Scale the finished buffer so its peak sits just under full scale.
    pub enable_normalization: bool,

    /// Keep hidden control events in the timeline for external viewers.
    pub add_visual_events: bool,

    /// Algorithm used to match sample rates.
    pub resampler: ResamplerStrategy,

    /// Interpretation of sound event pitch values.
    pub pitch_mapping: PitchMapping,

    /// Layout of multi-sequence batch renders.
    pub batch_layout: BatchLayout,

    /// Sample format of exported WAV files.
    pub output_format: SampleFormat,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            cut_fade_length_ms: 10,
            combine_delay_ms: 0,
            multithreading_slices: default_slices(),
            enable_normalization: true,
            add_visual_events: false,
            resampler: ResamplerStrategy::default(),
            pitch_mapping: PitchMapping::default(),
            batch_layout: BatchLayout::default(),
            output_format: SampleFormat::Int16,
        }
    }
}

impl EncoderSettings {
    /// Checks that the settings can drive a render.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedChannelCount` for anything but mono or stereo,
    /// and `InvalidSettings` for a zero sample rate or slice count.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if !(1..=2).contains(&self.channels) {
            return Err(EncodeError::UnsupportedChannelCount(self.channels));
        }
        if self.sample_rate == 0 {
            return Err(EncodeError::InvalidSettings("sample rate is zero".to_string()));
        }
        if self.multithreading_slices == 0 {
            return Err(EncodeError::InvalidSettings(
                "multithreading slices must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a placement calculator configured from these settings.
    pub fn calculator(&self) -> PlacementCalculator {
        PlacementCalculator::new()
            .with_combine_delay(self.combine_delay_ms)
            .with_visual_events(self.add_visual_events)
            .with_layout(self.batch_layout)
    }

    /// Loads settings from a JSON file. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns error if file reading or parsing fails
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Saves settings to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }
}
