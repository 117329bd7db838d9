//! WAV decoding.

use super::{
    PcmData, PcmHolder, SampleFormat, WavError, WavFormat, FORMAT_EXTENSIBLE, RF64_SIZE_MARKER,
};
use crate::audio::AudioBuffer;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Header information available before the payload is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub format: WavFormat,
    /// Declared payload length in bytes. The stream may end sooner.
    pub data_len: u64,
    /// True if the container was RF64 (or BW64).
    pub rf64: bool,
    /// Sample count from the `ds64` chunk, RF64 only.
    pub sample_count: Option<u64>,
}

/// Sizes carried by an RF64 `ds64` chunk.
struct Ds64 {
    data_len: u64,
    sample_count: u64,
}

/// Reads a WAV header on construction and the payload on demand.
pub struct WavReader<R> {
    reader: R,
    info: WavInfo,
}

impl<R: Read + Seek> WavReader<R> {
    /// Parses the container up to the start of the data chunk.
    ///
    /// Unknown chunks are skipped. The stream is left positioned at the
    /// first payload byte.
    ///
    /// # Errors
    ///
    /// Returns a `WavError` naming the first structural problem found.
    pub fn new(mut reader: R) -> Result<Self, WavError> {
        let rf64 = match read_id(&mut reader)? {
            Some(id) if &id == b"RIFF" => false,
            Some(id) if &id == b"RF64" || &id == b"BW64" => true,
            _ => return Err(WavError::MissingRiffHeader),
        };
        let _riff_len = read_u32(&mut reader)?;
        match read_id(&mut reader)? {
            Some(id) if &id == b"WAVE" => {}
            _ => return Err(WavError::MissingWaveHeader),
        }

        let ds64 = if rf64 {
            Some(read_ds64(&mut reader)?)
        } else {
            None
        };

        let mut format = None;
        loop {
            let Some(id) = read_id(&mut reader)? else {
                return Err(match format {
                    Some(_) => WavError::MissingDataChunk,
                    None => WavError::MissingFormatChunk,
                });
            };
            let len = read_u32(&mut reader)?;

            match &id {
                b"fmt " => format = Some(read_format(&mut reader, len)?),
                b"data" => {
                    let format = format.ok_or(WavError::MissingFormatChunk)?;
                    let data_len = match &ds64 {
                        Some(ds64) if len == RF64_SIZE_MARKER || ds64.data_len > len as u64 => {
                            ds64.data_len
                        }
                        _ => len as u64,
                    };
                    let info = WavInfo {
                        format,
                        data_len,
                        rf64,
                        sample_count: ds64.as_ref().map(|d| d.sample_count),
                    };
                    return Ok(Self { reader, info });
                }
                _ => {
                    tracing::trace!(
                        chunk = %String::from_utf8_lossy(&id),
                        len,
                        "skipping chunk"
                    );
                    skip(&mut reader, padded(len as u64))?;
                }
            }
        }
    }

    /// Returns the parsed header.
    pub fn info(&self) -> &WavInfo {
        &self.info
    }

    /// Reads and decodes the payload.
    ///
    /// Reading stops at the declared data length or the end of the
    /// stream, whichever comes first. A trailing partial frame is
    /// dropped.
    pub fn into_pcm(self) -> Result<PcmHolder, WavError> {
        let WavInfo { format, data_len, .. } = self.info;
        let mut bytes = Vec::new();
        self.reader.take(data_len).read_to_end(&mut bytes)?;

        let align = format.block_align().max(1) as usize;
        bytes.truncate(bytes.len() - bytes.len() % align);

        let channels = format.channels as usize;
        let data = match format.sample_format {
            SampleFormat::Int8 => PcmData::I8(decode(&bytes, channels, 1, |b| {
                (b[0] as i16 - 128) as i8
            })),
            SampleFormat::Int16 => {
                PcmData::I16(decode(&bytes, channels, 2, |b| i16::from_le_bytes([b[0], b[1]])))
            }
            SampleFormat::Int24 => PcmData::I24(decode(&bytes, channels, 3, |b| {
                i32::from_le_bytes([0, b[0], b[1], b[2]])
            })),
            SampleFormat::Int32 => PcmData::I32(decode(&bytes, channels, 4, |b| {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })),
            SampleFormat::Float32 => PcmData::F32(decode(&bytes, channels, 4, |b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]])
            })),
            SampleFormat::Float64 => PcmData::F64(decode(&bytes, channels, 8, |b| {
                let mut word = [0u8; 8];
                word.copy_from_slice(b);
                f64::from_le_bytes(word)
            })),
        };

        let mut holder = PcmHolder::new(format.sample_rate, data);
        holder.format_chunk_len = format.chunk_len;
        Ok(holder)
    }
}

/// Reads a complete WAV stream.
///
/// # Examples
///
/// ```
/// use seqwave::audio::AudioBuffer;
/// use seqwave::wav::{self, PcmHolder, SampleFormat};
/// use std::io::Cursor;
///
/// let buffer = AudioBuffer::from_channels(vec![vec![0.0f32, 0.5]]).unwrap();
/// let holder = PcmHolder::from_f32(&buffer, 48000, SampleFormat::Float32);
///
/// let mut bytes = Vec::new();
/// wav::write(&mut bytes, &holder).unwrap();
/// assert_eq!(wav::read(Cursor::new(bytes)).unwrap(), holder);
/// ```
pub fn read<R: Read + Seek>(reader: R) -> Result<PcmHolder, WavError> {
    WavReader::new(reader)?.into_pcm()
}

/// Reads a WAV file from disk.
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<PcmHolder, WavError> {
    read(BufReader::new(File::open(path)?))
}

fn decode<T, F>(bytes: &[u8], channels: usize, width: usize, f: F) -> AudioBuffer<T>
where
    T: Copy + Default,
    F: Fn(&[u8]) -> T,
{
    let samples: Vec<T> = bytes.chunks_exact(width).map(f).collect();
    AudioBuffer::from_interleaved(&samples, channels)
}

fn read_ds64<R: Read + Seek>(reader: &mut R) -> Result<Ds64, WavError> {
    match read_id(reader)? {
        Some(id) if &id == b"ds64" => {}
        _ => return Err(WavError::MissingDs64Chunk),
    }
    let len = read_u32(reader)?;
    if len < 24 {
        return Err(WavError::MissingDs64Chunk);
    }
    let _riff_len = read_u64(reader)?;
    let data_len = read_u64(reader)?;
    let sample_count = read_u64(reader)?;
    // Remaining bytes hold the optional chunk size table.
    skip(reader, padded(len as u64) - 24)?;
    Ok(Ds64 {
        data_len,
        sample_count,
    })
}

fn read_format<R: Read + Seek>(reader: &mut R, len: u32) -> Result<WavFormat, WavError> {
    if len < 16 {
        return Err(WavError::InvalidFormatChunk(format!(
            "chunk is {len} bytes, expected at least 16"
        )));
    }
    let mut tag = read_u16(reader)?;
    let channels = read_u16(reader)?;
    let sample_rate = read_u32(reader)?;
    let _byte_rate = read_u32(reader)?;
    let _block_align = read_u16(reader)?;
    let bits = read_u16(reader)?;
    let mut consumed = 16u64;
    let extensible = tag == FORMAT_EXTENSIBLE;

    if extensible && len >= 40 {
        let _cb_size = read_u16(reader)?;
        let _valid_bits = read_u16(reader)?;
        let _channel_mask = read_u32(reader)?;
        // The sub-format GUID starts with the real format tag.
        tag = read_u16(reader)?;
        consumed += 10;
    }
    skip(reader, padded(len as u64) - consumed)?;

    if channels == 0 {
        return Err(WavError::InvalidFormatChunk("zero channels".to_string()));
    }
    if sample_rate == 0 {
        return Err(WavError::InvalidFormatChunk("zero sample rate".to_string()));
    }
    let sample_format =
        SampleFormat::from_tag(tag, bits).ok_or(WavError::UnsupportedSampleFormat { tag, bits })?;

    let mut format = WavFormat::new(sample_format, channels, sample_rate);
    if format.checked_block_align().is_none() {
        return Err(WavError::InvalidFormatChunk(format!(
            "{channels} channels of {bits} bits overflow the block alignment"
        )));
    }
    // Plain 16- and 18-byte chunks are written back as they were read.
    if !extensible && (len == 16 || len == 18) {
        format.chunk_len = len;
    }
    Ok(format)
}

/// Chunk bodies are padded to an even length.
fn padded(len: u64) -> u64 {
    len + (len & 1)
}

fn skip<R: Seek>(reader: &mut R, len: u64) -> io::Result<()> {
    if len > 0 {
        reader.seek(SeekFrom::Current(len as i64))?;
    }
    Ok(())
}

/// Reads a four-byte chunk id, returning None at end of stream.
fn read_id<R: Read>(reader: &mut R) -> io::Result<Option<[u8; 4]>> {
    let mut id = [0u8; 4];
    let mut filled = 0;
    while filled < id.len() {
        match reader.read(&mut id[filled..]) {
            Ok(0) => return Ok(None),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(id))
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Canonical 16-bit stereo file with two frames.
    fn canonical_stereo() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&44u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&44100u32.to_le_bytes());
        bytes.extend_from_slice(&176400u32.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        for sample in [1000i16, -1000, 32767, -32768] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_read_canonical() {
        let holder = read(Cursor::new(canonical_stereo())).unwrap();
        assert_eq!(holder.sample_rate, 44100);
        assert_eq!(holder.channels(), 2);
        let PcmData::I16(buffer) = &holder.data else {
            panic!("expected 16-bit data");
        };
        assert_eq!(buffer.channel(0).unwrap(), &[1000, 32767]);
        assert_eq!(buffer.channel(1).unwrap(), &[-1000, -32768]);
    }

    /// Mono float file with a 16-byte format chunk and two frames.
    fn compact_float_mono() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&44u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&48000u32.to_le_bytes());
        bytes.extend_from_slice(&192000u32.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&32u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&8u32.to_le_bytes());
        for sample in [0.25f32, -0.75] {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_compact_float_header_roundtrip() {
        let bytes = compact_float_mono();
        let holder = read(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(holder.format().sample_format, SampleFormat::Float32);
        assert_eq!(holder.format_chunk_len, 16);

        let mut written = Vec::new();
        super::super::write(&mut written, &holder).unwrap();
        assert_eq!(written.len(), 52);
        assert_eq!(written, bytes);
    }

    #[test]
    fn test_byte_exact_roundtrip() {
        let bytes = canonical_stereo();
        let holder = read(Cursor::new(bytes.clone())).unwrap();
        let mut written = Vec::new();
        super::super::write(&mut written, &holder).unwrap();
        assert_eq!(written, bytes);
    }

    #[test]
    fn test_skips_unknown_and_padded_chunks() {
        let canonical = canonical_stereo();
        let mut bytes = canonical[..12].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"abc\0"); // 3 bytes plus pad
        bytes.extend_from_slice(&canonical[12..]);

        let holder = read(Cursor::new(bytes)).unwrap();
        assert_eq!(holder, read(Cursor::new(canonical)).unwrap());
    }

    #[test]
    fn test_format_extension_bytes_skipped() {
        let canonical = canonical_stereo();
        let mut bytes = canonical[..16].to_vec();
        bytes.extend_from_slice(&18u32.to_le_bytes());
        bytes.extend_from_slice(&canonical[20..36]);
        bytes.extend_from_slice(&0u16.to_le_bytes()); // cbSize
        bytes.extend_from_slice(&canonical[36..]);

        let holder = read(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(holder.frames(), 2);
        assert_eq!(holder.format_chunk_len, 18);

        let mut written = Vec::new();
        super::super::write(&mut written, &holder).unwrap();
        assert_eq!(&written[16..20], &18u32.to_le_bytes());
        assert_eq!(&written[written.len() - 8..], &bytes[bytes.len() - 8..]);
    }

    #[test]
    fn test_bw64_header_is_accepted() {
        let holder = read(Cursor::new(canonical_stereo())).unwrap();
        let mut bytes = Vec::new();
        super::super::write_with_options(
            &mut bytes,
            &holder,
            super::super::WavWriteOptions { force_rf64: true },
        )
        .unwrap();
        bytes[0..4].copy_from_slice(b"BW64");

        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.info().rf64);
        assert_eq!(reader.info().sample_count, Some(2));
        assert_eq!(reader.into_pcm().unwrap(), holder);
    }

    #[test]
    fn test_extensible_format() {
        let canonical = canonical_stereo();
        let mut bytes = canonical[..16].to_vec();
        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(&FORMAT_EXTENSIBLE.to_le_bytes());
        bytes.extend_from_slice(&canonical[22..36]);
        bytes.extend_from_slice(&22u16.to_le_bytes()); // cbSize
        bytes.extend_from_slice(&16u16.to_le_bytes()); // valid bits
        bytes.extend_from_slice(&3u32.to_le_bytes()); // channel mask
        bytes.extend_from_slice(&1u16.to_le_bytes()); // sub-format: PCM
        bytes.extend_from_slice(&[0u8; 14]);
        bytes.extend_from_slice(&canonical[36..]);

        let holder = read(Cursor::new(bytes)).unwrap();
        assert_eq!(holder.format().sample_format, SampleFormat::Int16);
        assert_eq!(holder.format_chunk_len, 16);
        assert_eq!(holder.frames(), 2);
    }

    #[test]
    fn test_truncated_data_stops_at_stream_end() {
        let mut bytes = canonical_stereo();
        bytes.truncate(bytes.len() - 3); // one and a quarter frames remain
        let holder = read(Cursor::new(bytes)).unwrap();
        assert_eq!(holder.frames(), 1);
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(
            read(Cursor::new(Vec::new())),
            Err(WavError::MissingRiffHeader)
        ));
        assert!(matches!(
            read(Cursor::new(b"RIFX\0\0\0\0WAVE".to_vec())),
            Err(WavError::MissingRiffHeader)
        ));

        let mut bytes = canonical_stereo();
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(read(Cursor::new(bytes)), Err(WavError::MissingWaveHeader)));

        let mut bytes = canonical_stereo();
        bytes[0..4].copy_from_slice(b"RF64");
        assert!(matches!(read(Cursor::new(bytes)), Err(WavError::MissingDs64Chunk)));

        let mut bytes = canonical_stereo();
        bytes[16..20].copy_from_slice(&14u32.to_le_bytes());
        assert!(matches!(
            read(Cursor::new(bytes)),
            Err(WavError::InvalidFormatChunk(_))
        ));

        let mut bytes = canonical_stereo();
        bytes[20..22].copy_from_slice(&2u16.to_le_bytes()); // ADPCM
        assert!(matches!(
            read(Cursor::new(bytes)),
            Err(WavError::UnsupportedSampleFormat { tag: 2, bits: 16 })
        ));

        let bytes = canonical_stereo()[..36].to_vec();
        assert!(matches!(read(Cursor::new(bytes)), Err(WavError::MissingDataChunk)));
    }

    #[test]
    fn test_rejects_impossible_format_fields() {
        let mut bytes = canonical_stereo();
        bytes[24..28].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            read(Cursor::new(bytes)),
            Err(WavError::InvalidFormatChunk(_))
        ));

        // 32768 channels of 16-bit samples need a 65536-byte frame.
        let mut bytes = canonical_stereo();
        bytes[22..24].copy_from_slice(&32768u16.to_le_bytes());
        assert!(matches!(
            WavReader::new(Cursor::new(bytes)),
            Err(WavError::InvalidFormatChunk(_))
        ));

        let mut bytes = canonical_stereo();
        bytes[22..24].copy_from_slice(&u16::MAX.to_le_bytes());
        assert!(matches!(
            read(Cursor::new(bytes)),
            Err(WavError::InvalidFormatChunk(_))
        ));
    }
}
