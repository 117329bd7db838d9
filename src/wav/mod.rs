//! RIFF/WAVE and RF64 container codec.
//!
//! Reads and writes little-endian WAV files holding integer PCM (8, 16,
//! 24, 32 bit) or IEEE float (32, 64 bit) samples. Payloads that do not
//! fit 32-bit chunk sizes are written as RF64 with a `ds64` chunk.
//!
//! # Canonical form
//!
//! The writer always emits `RIFF`/`RF64`, `WAVE`, optional `ds64`, `fmt `
//! and `data`, in that order, with a 16-byte format chunk for integer PCM
//! and an 18-byte one (`cbSize = 0`) for float. A 16- or 18-byte format
//! chunk read from a file is kept on the holder, so files in either form
//! survive a read/write round trip byte for byte.

mod reader;
mod writer;

pub use reader::{read, read_file, WavInfo, WavReader};
pub use writer::{write, write_file, write_header, write_with_options, WavWriteOptions};

use crate::audio::AudioBuffer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format tag for integer PCM.
pub const FORMAT_PCM: u16 = 1;
/// Format tag for IEEE float.
pub const FORMAT_IEEE_FLOAT: u16 = 3;
/// Format tag for WAVE_FORMAT_EXTENSIBLE.
pub const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Size placeholder used by RF64 in 32-bit size fields.
pub(crate) const RF64_SIZE_MARKER: u32 = u32::MAX;

/// Errors that can occur while reading or writing WAV data.
#[derive(Error, Debug)]
pub enum WavError {
    #[error("missing RIFF header")]
    MissingRiffHeader,

    #[error("missing WAVE header")]
    MissingWaveHeader,

    #[error("RF64 file has no ds64 chunk")]
    MissingDs64Chunk,

    #[error("invalid format chunk: {0}")]
    InvalidFormatChunk(String),

    #[error("no format chunk before data")]
    MissingFormatChunk,

    #[error("no data chunk")]
    MissingDataChunk,

    #[error("unsupported sample format: tag {tag}, {bits} bits")]
    UnsupportedSampleFormat { tag: u16, bits: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encoding of individual samples in the data chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// 8-bit unsigned integer PCM.
    Int8,
    /// 16-bit signed integer PCM.
    #[default]
    Int16,
    /// 24-bit signed integer PCM.
    Int24,
    /// 32-bit signed integer PCM.
    Int32,
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
}

impl SampleFormat {
    /// Looks up the format for a format tag and bit depth.
    pub fn from_tag(tag: u16, bits: u16) -> Option<Self> {
        match (tag, bits) {
            (FORMAT_PCM, 8) => Some(Self::Int8),
            (FORMAT_PCM, 16) => Some(Self::Int16),
            (FORMAT_PCM, 24) => Some(Self::Int24),
            (FORMAT_PCM, 32) => Some(Self::Int32),
            (FORMAT_IEEE_FLOAT, 32) => Some(Self::Float32),
            (FORMAT_IEEE_FLOAT, 64) => Some(Self::Float64),
            _ => None,
        }
    }

    /// Parses a bit depth as accepted on the command line (`8`, `16`,
    /// `24`, `32`, `32f`, `64f`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "8" => Some(Self::Int8),
            "16" => Some(Self::Int16),
            "24" => Some(Self::Int24),
            "32" => Some(Self::Int32),
            "32f" | "float" => Some(Self::Float32),
            "64f" => Some(Self::Float64),
            _ => None,
        }
    }

    /// Returns the format tag written to the `fmt ` chunk.
    pub fn format_tag(self) -> u16 {
        match self {
            Self::Float32 | Self::Float64 => FORMAT_IEEE_FLOAT,
            _ => FORMAT_PCM,
        }
    }

    /// Returns the bits per sample.
    pub fn bits(self) -> u16 {
        match self {
            Self::Int8 => 8,
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Int32 | Self::Float32 => 32,
            Self::Float64 => 64,
        }
    }

    /// Returns the bytes per sample.
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Returns true for IEEE float formats.
    pub fn is_float(self) -> bool {
        self.format_tag() == FORMAT_IEEE_FLOAT
    }
}

/// Stream parameters carried by the `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Length of the `fmt ` chunk body: 16, or 18 with a zero `cbSize`.
    pub chunk_len: u32,
}

impl WavFormat {
    /// Describes a stream with the canonical chunk length for its format.
    pub fn new(sample_format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            sample_format,
            channels,
            sample_rate,
            chunk_len: canonical_chunk_len(sample_format),
        }
    }

    /// Returns the size of one frame in bytes, or None if it does not
    /// fit the 16-bit header field.
    pub fn checked_block_align(&self) -> Option<u16> {
        self.channels.checked_mul(self.sample_format.bytes() as u16)
    }

    /// Returns the size of one frame in bytes, saturating at `u16::MAX`.
    pub fn block_align(&self) -> u16 {
        self.checked_block_align().unwrap_or(u16::MAX)
    }

    /// Returns the number of bytes per second, saturating at `u32::MAX`.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(u32::from(self.block_align()))
    }
}

/// Returns the `fmt ` chunk length the writer emits by default.
pub fn canonical_chunk_len(sample_format: SampleFormat) -> u32 {
    if sample_format.is_float() {
        18
    } else {
        16
    }
}

/// Typed sample storage for one decoded data chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum PcmData {
    /// 8-bit PCM, re-centered around zero.
    I8(AudioBuffer<i8>),
    I16(AudioBuffer<i16>),
    /// 24-bit PCM, shifted into the high bits of each word.
    I24(AudioBuffer<i32>),
    I32(AudioBuffer<i32>),
    F32(AudioBuffer<f32>),
    F64(AudioBuffer<f64>),
}

impl PcmData {
    /// Returns the sample format matching this storage.
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            Self::I8(_) => SampleFormat::Int8,
            Self::I16(_) => SampleFormat::Int16,
            Self::I24(_) => SampleFormat::Int24,
            Self::I32(_) => SampleFormat::Int32,
            Self::F32(_) => SampleFormat::Float32,
            Self::F64(_) => SampleFormat::Float64,
        }
    }

    fn channel_count(&self) -> usize {
        match self {
            Self::I8(b) => b.channel_count(),
            Self::I16(b) => b.channel_count(),
            Self::I24(b) | Self::I32(b) => b.channel_count(),
            Self::F32(b) => b.channel_count(),
            Self::F64(b) => b.channel_count(),
        }
    }

    fn frames(&self) -> usize {
        match self {
            Self::I8(b) => b.frames(),
            Self::I16(b) => b.frames(),
            Self::I24(b) | Self::I32(b) => b.frames(),
            Self::F32(b) => b.frames(),
            Self::F64(b) => b.frames(),
        }
    }
}

/// Decoded PCM plus the sample rate it was recorded at.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmHolder {
    pub sample_rate: u32,
    pub data: PcmData,
    /// Length of the `fmt ` chunk body to write: 16, or 18 with `cbSize`.
    pub format_chunk_len: u32,
}

impl PcmHolder {
    /// Wraps typed samples.
    pub fn new(sample_rate: u32, data: PcmData) -> Self {
        let format_chunk_len = canonical_chunk_len(data.sample_format());
        Self {
            sample_rate,
            data,
            format_chunk_len,
        }
    }

    /// Quantizes a float buffer to `sample_format`.
    pub fn from_f32(buffer: &AudioBuffer<f32>, sample_rate: u32, sample_format: SampleFormat) -> Self {
        let data = match sample_format {
            SampleFormat::Int8 => PcmData::I8(AudioBuffer::from_f32(buffer)),
            SampleFormat::Int16 => PcmData::I16(AudioBuffer::from_f32(buffer)),
            SampleFormat::Int24 => {
                // Quantize at 24 bits, then shift up so the word is full scale.
                PcmData::I24(buffer.map(|s| {
                    ((s as f64 * 8_388_608.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32) << 8
                }))
            }
            SampleFormat::Int32 => PcmData::I32(AudioBuffer::from_f32(buffer)),
            SampleFormat::Float32 => PcmData::F32(buffer.clone()),
            SampleFormat::Float64 => PcmData::F64(AudioBuffer::from_f32(buffer)),
        };
        Self::new(sample_rate, data)
    }

    /// Converts the samples to floats in [-1, 1].
    pub fn to_f32(&self) -> AudioBuffer<f32> {
        match &self.data {
            PcmData::I8(b) => b.to_f32(),
            PcmData::I16(b) => b.to_f32(),
            PcmData::I24(b) | PcmData::I32(b) => b.to_f32(),
            PcmData::F32(b) => b.clone(),
            PcmData::F64(b) => b.to_f32(),
        }
    }

    /// Returns the stream parameters for the `fmt ` chunk.
    pub fn format(&self) -> WavFormat {
        WavFormat {
            sample_format: self.data.sample_format(),
            channels: self.data.channel_count() as u16,
            sample_rate: self.sample_rate,
            chunk_len: self.format_chunk_len,
        }
    }

    /// Returns the number of channels.
    pub fn channels(&self) -> u16 {
        self.data.channel_count() as u16
    }

    /// Returns the number of frames.
    pub fn frames(&self) -> usize {
        self.data.frames()
    }

    /// Returns the payload length in bytes.
    pub fn data_len(&self) -> u64 {
        self.frames() as u64 * self.format().block_align() as u64
    }
}
