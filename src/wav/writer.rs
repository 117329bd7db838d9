//! WAV encoding.

use super::{PcmData, PcmHolder, WavError, WavFormat, RF64_SIZE_MARKER};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Length of the `ds64` chunk body without a size table.
const DS64_LEN: u32 = 28;

/// Options controlling container framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WavWriteOptions {
    /// Write RF64 framing even when the payload fits a plain RIFF file.
    pub force_rf64: bool,
}

/// Writes the container header for a payload of `data_len` bytes.
///
/// RF64 framing is chosen when the RIFF size would not fit in 32 bits, or
/// when `options.force_rf64` is set. The payload itself (plus a pad byte
/// for odd lengths) must follow.
///
/// # Returns
///
/// true if RF64 framing was written
pub fn write_header<W: Write>(
    writer: &mut W,
    format: &WavFormat,
    data_len: u64,
    options: WavWriteOptions,
) -> Result<bool, WavError> {
    let fmt_len: u32 = if format.chunk_len == 16 { 16 } else { 18 };
    let riff_body = 4 + (8 + fmt_len as u64) + 8 + data_len + (data_len & 1);
    let rf64 = options.force_rf64 || riff_body > u32::MAX as u64;

    if rf64 {
        let riff_len = riff_body + 8 + DS64_LEN as u64;
        let block_align = format.block_align().max(1) as u64;

        writer.write_all(b"RF64")?;
        writer.write_all(&RF64_SIZE_MARKER.to_le_bytes())?;
        writer.write_all(b"WAVE")?;
        writer.write_all(b"ds64")?;
        writer.write_all(&DS64_LEN.to_le_bytes())?;
        writer.write_all(&riff_len.to_le_bytes())?;
        writer.write_all(&data_len.to_le_bytes())?;
        writer.write_all(&(data_len / block_align).to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?; // table length
    } else {
        writer.write_all(b"RIFF")?;
        writer.write_all(&(riff_body as u32).to_le_bytes())?;
        writer.write_all(b"WAVE")?;
    }

    writer.write_all(b"fmt ")?;
    writer.write_all(&fmt_len.to_le_bytes())?;
    writer.write_all(&format.sample_format.format_tag().to_le_bytes())?;
    writer.write_all(&format.channels.to_le_bytes())?;
    writer.write_all(&format.sample_rate.to_le_bytes())?;
    writer.write_all(&format.byte_rate().to_le_bytes())?;
    writer.write_all(&format.block_align().to_le_bytes())?;
    writer.write_all(&format.sample_format.bits().to_le_bytes())?;
    if fmt_len == 18 {
        writer.write_all(&0u16.to_le_bytes())?; // cbSize
    }

    writer.write_all(b"data")?;
    let data_field = if rf64 {
        RF64_SIZE_MARKER
    } else {
        data_len as u32
    };
    writer.write_all(&data_field.to_le_bytes())?;

    Ok(rf64)
}

/// Writes a complete WAV stream in canonical form.
pub fn write<W: Write>(writer: &mut W, holder: &PcmHolder) -> Result<(), WavError> {
    write_with_options(writer, holder, WavWriteOptions::default())
}

/// Writes a complete WAV stream with explicit framing options.
pub fn write_with_options<W: Write>(
    writer: &mut W,
    holder: &PcmHolder,
    options: WavWriteOptions,
) -> Result<(), WavError> {
    let data_len = holder.data_len();
    write_header(writer, &holder.format(), data_len, options)?;

    match &holder.data {
        PcmData::I8(b) => encode(writer, &b.interleaved(), |s| [(s as i16 + 128) as u8])?,
        PcmData::I16(b) => encode(writer, &b.interleaved(), i16::to_le_bytes)?,
        PcmData::I24(b) => encode(writer, &b.interleaved(), |s| {
            let [_, lo, mid, hi] = s.to_le_bytes();
            [lo, mid, hi]
        })?,
        PcmData::I32(b) => encode(writer, &b.interleaved(), i32::to_le_bytes)?,
        PcmData::F32(b) => encode(writer, &b.interleaved(), f32::to_le_bytes)?,
        PcmData::F64(b) => encode(writer, &b.interleaved(), f64::to_le_bytes)?,
    }

    if data_len & 1 == 1 {
        writer.write_all(&[0])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a WAV file to disk.
pub fn write_file<P: AsRef<Path>>(path: P, holder: &PcmHolder) -> Result<(), WavError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write(&mut writer, holder)
}

/// Encodes samples in blocks to keep the write calls coarse.
fn encode<W, T, F, const N: usize>(writer: &mut W, samples: &[T], f: F) -> Result<(), WavError>
where
    W: Write,
    T: Copy,
    F: Fn(T) -> [u8; N],
{
    const BLOCK: usize = 4096;
    let mut bytes = Vec::with_capacity(BLOCK * N);
    for chunk in samples.chunks(BLOCK) {
        bytes.clear();
        for &sample in chunk {
            bytes.extend_from_slice(&f(sample));
        }
        writer.write_all(&bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::wav::{read, read_file, SampleFormat, WavReader};
    use std::io::Cursor;

    fn sine(channels: usize, frames: usize) -> AudioBuffer<f32> {
        let data = (0..channels)
            .map(|c| {
                (0..frames)
                    .map(|i| ((i as f32 * 0.05 + c as f32).sin() * 0.8))
                    .collect()
            })
            .collect();
        AudioBuffer::from_channels(data).unwrap()
    }

    #[test]
    fn test_roundtrip_formats_and_channels() {
        let formats = [
            SampleFormat::Int8,
            SampleFormat::Int16,
            SampleFormat::Int24,
            SampleFormat::Int32,
            SampleFormat::Float32,
            SampleFormat::Float64,
        ];
        for channels in [1, 2] {
            for format in formats {
                // Odd frame count exercises the pad byte for 8-bit mono.
                let holder = PcmHolder::from_f32(&sine(channels, 101), 22050, format);
                let mut bytes = Vec::new();
                write(&mut bytes, &holder).unwrap();
                assert_eq!(bytes.len() % 2, 0);

                let back = read(Cursor::new(bytes)).unwrap();
                assert_eq!(back, holder, "{format:?} x{channels}");
            }
        }
    }

    #[test]
    fn test_float_chunk_is_eighteen_bytes() {
        let holder = PcmHolder::from_f32(&sine(1, 4), 48000, SampleFormat::Float32);
        let mut bytes = Vec::new();
        write(&mut bytes, &holder).unwrap();
        assert_eq!(u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]), 18);
        assert_eq!(u16::from_le_bytes([bytes[20], bytes[21]]), 3);
        assert_eq!(bytes.len(), 12 + 8 + 18 + 8 + 16);
    }

    #[test]
    fn test_large_payload_uses_rf64() {
        let format = WavFormat::new(SampleFormat::Int16, 2, 48000);
        let declared = 5u64 << 30; // 5 GiB
        let mut bytes = Vec::new();
        let rf64 = write_header(&mut bytes, &format, declared, WavWriteOptions::default()).unwrap();
        assert!(rf64);
        assert_eq!(&bytes[0..4], b"RF64");
        assert_eq!(&bytes[4..8], &u32::MAX.to_le_bytes());
        assert_eq!(&bytes[12..16], b"ds64");
        let data_field = &bytes[bytes.len() - 4..];
        assert_eq!(data_field, &u32::MAX.to_le_bytes());

        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let info = reader.info();
        assert!(info.rf64);
        assert_eq!(info.data_len, declared);
        assert_eq!(info.sample_count, Some(declared / 4));
        assert_eq!(info.format, format);
    }

    #[test]
    fn test_small_payload_uses_riff() {
        let format = WavFormat::new(SampleFormat::Int16, 1, 8000);
        let mut bytes = Vec::new();
        assert!(!write_header(&mut bytes, &format, 1000, WavWriteOptions::default()).unwrap());
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(bytes.len(), 44);
    }

    #[test]
    fn test_forced_rf64_roundtrip() {
        let holder = PcmHolder::from_f32(&sine(2, 64), 44100, SampleFormat::Int16);
        let mut bytes = Vec::new();
        write_with_options(&mut bytes, &holder, WavWriteOptions { force_rf64: true }).unwrap();
        assert_eq!(&bytes[0..4], b"RF64");

        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.info().data_len, holder.data_len());
        assert_eq!(reader.into_pcm().unwrap(), holder);
    }

    #[test]
    fn test_hound_reads_our_output() {
        let holder = PcmHolder::from_f32(&sine(2, 256), 48000, SampleFormat::Int16);
        let path = std::env::temp_dir().join("seqwave_hound_interop.wav");
        write_file(&path, &holder).unwrap();

        let mut hound_reader = hound::WavReader::open(&path).unwrap();
        let spec = hound_reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = hound_reader.samples::<i16>().map(|s| s.unwrap()).collect();
        let PcmData::I16(buffer) = &holder.data else {
            panic!("expected 16-bit data");
        };
        assert_eq!(samples, buffer.interleaved());

        assert_eq!(read_file(&path).unwrap(), holder);
        std::fs::remove_file(path).unwrap();
    }
}
