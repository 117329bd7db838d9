//! Planar multichannel sample buffers.
//!
//! Samples are stored one contiguous vector per channel. All channels
//! always have the same length.

use std::collections::TryReserveError;

/// A planar buffer of samples, one vector per channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer<T> {
    channels: Vec<Vec<T>>,
}

impl<T: Copy + Default> AudioBuffer<T> {
    /// Creates a zero-filled buffer.
    pub fn new(channel_count: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![T::default(); frames]; channel_count],
        }
    }

    /// Creates a zero-filled buffer, reporting allocation failure instead
    /// of aborting.
    pub fn try_new(channel_count: usize, frames: usize) -> Result<Self, TryReserveError> {
        let mut channels = Vec::new();
        channels.try_reserve_exact(channel_count)?;
        for _ in 0..channel_count {
            let mut channel = Vec::new();
            channel.try_reserve_exact(frames)?;
            channel.resize(frames, T::default());
            channels.push(channel);
        }
        Ok(Self { channels })
    }

    /// Builds a buffer from planar channel data.
    ///
    /// # Returns
    ///
    /// None if the channels have different lengths.
    pub fn from_channels(channels: Vec<Vec<T>>) -> Option<Self> {
        let frames = channels.first().map_or(0, Vec::len);
        channels
            .iter()
            .all(|c| c.len() == frames)
            .then_some(Self { channels })
    }

    /// Builds a buffer from interleaved frames. A trailing partial frame
    /// is dropped.
    pub fn from_interleaved(samples: &[T], channel_count: usize) -> Self {
        if channel_count == 0 {
            return Self::default();
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self { channels }
    }

    /// Returns the samples interleaved frame by frame.
    pub fn interleaved(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.frames() * self.channel_count());
        for frame in 0..self.frames() {
            out.extend(self.channels.iter().map(|c| c[frame]));
        }
        out
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns the number of samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Returns true if the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Returns one channel's samples.
    pub fn channel(&self, index: usize) -> Option<&[T]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Returns all channels.
    pub fn channels(&self) -> &[Vec<T>] {
        &self.channels
    }

    /// Returns all channels mutably. Lengths cannot be changed through
    /// the returned slices.
    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [T]> {
        self.channels.iter_mut().map(Vec::as_mut_slice)
    }

    /// Consumes the buffer, returning the planar channel data.
    pub fn into_channels(self) -> Vec<Vec<T>> {
        self.channels
    }

    /// Converts every sample with `f`.
    pub fn map<U, F>(&self, f: F) -> AudioBuffer<U>
    where
        F: Fn(T) -> U,
    {
        AudioBuffer {
            channels: self
                .channels
                .iter()
                .map(|c| c.iter().map(|&s| f(s)).collect())
                .collect(),
        }
    }
}

impl AudioBuffer<f32> {
    /// Returns the largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

/// Conversion between render-time floating point samples and stored
/// sample types.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    /// Converts to a float in [-1, 1].
    fn to_f32(self) -> f32;
    /// Converts from a float, clamping to the representable range.
    fn from_f32(value: f32) -> Self;
}

impl Sample for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Sample for f64 {
    fn to_f32(self) -> f32 {
        self as f32
    }

    fn from_f32(value: f32) -> Self {
        value as f64
    }
}

impl Sample for i8 {
    fn to_f32(self) -> f32 {
        self as f32 / 128.0
    }

    fn from_f32(value: f32) -> Self {
        (value * 128.0).round().clamp(-128.0, 127.0) as i8
    }
}

impl Sample for i16 {
    fn to_f32(self) -> f32 {
        self as f32 / 32768.0
    }

    fn from_f32(value: f32) -> Self {
        (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16
    }
}

/// 32-bit integers also carry 24-bit PCM, shifted into the high 24 bits.
impl Sample for i32 {
    fn to_f32(self) -> f32 {
        (self as f64 / 2_147_483_648.0) as f32
    }

    fn from_f32(value: f32) -> Self {
        (value as f64 * 2_147_483_648.0)
            .round()
            .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32
    }
}

impl<T: Sample> AudioBuffer<T> {
    /// Converts to floating point samples.
    pub fn to_f32(&self) -> AudioBuffer<f32> {
        self.map(|s| s.to_f32())
    }

    /// Converts floating point samples to this type, clamping.
    pub fn from_f32(buffer: &AudioBuffer<f32>) -> Self {
        buffer.map(T::from_f32)
    }
}
