//! Sample rate conversion strategies.
//!
//! Every strategy maps output sample `i` to the fractional source position
//! `i * source_rate / target_rate` and produces exactly
//! `ceil(len * target_rate / source_rate)` samples, so strategies can be
//! swapped without changing the length of anything downstream.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Default sinc kernel half-width (64 taps in total).
pub const DEFAULT_SINC_HALF_WIDTH: usize = 32;

/// Default quantization levels for the bit crusher (4-bit).
pub const DEFAULT_CRUSH_LEVELS: u32 = 16;

/// A sample rate converter.
pub trait Resampler: Send + Sync {
    /// Converts `samples` from `source_rate` to `target_rate`.
    ///
    /// Returns an empty vector for empty input or a zero rate.
    fn resample(&self, samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32>;
}

/// Returns the output length for a conversion: `ceil(len * target / source)`.
pub fn output_len(input_len: usize, source_rate: u32, target_rate: u32) -> usize {
    if input_len == 0 || source_rate == 0 || target_rate == 0 {
        return 0;
    }
    let numerator = input_len as u128 * target_rate as u128;
    numerator.div_ceil(source_rate as u128) as usize
}

/// Source position of output sample `i`, split into integer index and
/// fraction. Integer math keeps long buffers from drifting.
#[inline]
fn source_position(i: usize, source_rate: u32, target_rate: u32) -> (usize, f64) {
    let scaled = i as u128 * source_rate as u128;
    let index = scaled / target_rate as u128;
    let remainder = scaled % target_rate as u128;
    (index as usize, remainder as f64 / target_rate as f64)
}

/// Runs `f` for every output position.
fn map_positions<F>(samples: &[f32], source_rate: u32, target_rate: u32, f: F) -> Vec<f32>
where
    F: Fn(usize, f64) -> f32,
{
    let len = output_len(samples.len(), source_rate, target_rate);
    (0..len)
        .map(|i| {
            let (index, fraction) = source_position(i, source_rate, target_rate);
            f(index, fraction)
        })
        .collect()
}

#[inline]
fn clamped(samples: &[f32], index: isize) -> f32 {
    let last = samples.len() as isize - 1;
    samples[index.clamp(0, last) as usize]
}

/// Zero-order hold: takes the source sample at or before each position.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestResampler;

impl Resampler for NearestResampler {
    fn resample(&self, samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        map_positions(samples, source_rate, target_rate, |index, _| {
            clamped(samples, index as isize)
        })
    }
}

/// Linear interpolation between the two neighbouring samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearResampler;

impl Resampler for LinearResampler {
    fn resample(&self, samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        map_positions(samples, source_rate, target_rate, |index, fraction| {
            let a = clamped(samples, index as isize) as f64;
            let b = clamped(samples, index as isize + 1) as f64;
            (a + (b - a) * fraction) as f32
        })
    }
}

/// 4-point Catmull-Rom interpolation with edge-clamped taps.
#[derive(Debug, Clone, Copy, Default)]
pub struct HermiteResampler;

impl Resampler for HermiteResampler {
    fn resample(&self, samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        map_positions(samples, source_rate, target_rate, |index, t| {
            let i = index as isize;
            let p0 = clamped(samples, i - 1) as f64;
            let p1 = clamped(samples, i) as f64;
            let p2 = clamped(samples, i + 1) as f64;
            let p3 = clamped(samples, i + 2) as f64;

            let c1 = 0.5 * (p2 - p0);
            let c2 = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
            let c3 = 0.5 * (p3 - p0) + 1.5 * (p1 - p2);
            (((c3 * t + c2) * t + c1) * t + p1) as f32
        })
    }
}

/// Hann-windowed sinc interpolation.
///
/// The kernel is scaled down when decimating so the cutoff follows the
/// lower of the two Nyquist frequencies. Taps outside the input are zero.
#[derive(Debug, Clone, Copy)]
pub struct SincResampler {
    half_width: usize,
}

impl SincResampler {
    /// Creates a resampler with `half_width` taps on each side.
    pub fn new(half_width: usize) -> Self {
        Self {
            half_width: half_width.max(1),
        }
    }
}

impl Default for SincResampler {
    fn default() -> Self {
        Self::new(DEFAULT_SINC_HALF_WIDTH)
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

impl Resampler for SincResampler {
    fn resample(&self, samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        let cutoff = (target_rate as f64 / source_rate.max(1) as f64).min(1.0);
        // Widen the kernel in source samples when the cutoff drops.
        let reach = (self.half_width as f64 / cutoff).ceil() as isize;
        let last = samples.len() as isize - 1;

        map_positions(samples, source_rate, target_rate, |index, fraction| {
            let center = index as isize;
            let mut acc = 0.0f64;
            for j in (center - reach + 1).max(0)..=(center + reach).min(last) {
                let distance = (j - center) as f64 - fraction;
                let scaled = distance * cutoff;
                if scaled.abs() >= self.half_width as f64 {
                    continue;
                }
                let window = 0.5 * (1.0 + (PI * scaled / self.half_width as f64).cos());
                acc += samples[j as usize] as f64 * cutoff * sinc(scaled) * window;
            }
            acc as f32
        })
    }
}

/// Lossy effect: nearest-sample lookup quantized to a fixed number of
/// levels.
#[derive(Debug, Clone, Copy)]
pub struct BitCrushResampler {
    levels: u32,
}

impl BitCrushResampler {
    /// Creates a crusher with `levels` output levels (at least 2).
    pub fn new(levels: u32) -> Self {
        Self {
            levels: levels.max(2),
        }
    }
}

impl Default for BitCrushResampler {
    fn default() -> Self {
        Self::new(DEFAULT_CRUSH_LEVELS)
    }
}

impl Resampler for BitCrushResampler {
    fn resample(&self, samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        let steps = (self.levels - 1) as f64;
        map_positions(samples, source_rate, target_rate, |index, _| {
            let s = (clamped(samples, index as isize) as f64).clamp(-1.0, 1.0);
            let level = ((s + 1.0) * 0.5 * steps).round();
            (level / steps * 2.0 - 1.0) as f32
        })
    }
}

/// Selectable resampling algorithm, in increasing order of cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplerStrategy {
    /// Nearest sample, no interpolation.
    Nearest,
    /// Linear interpolation.
    Linear,
    /// Cubic Hermite (Catmull-Rom) interpolation.
    #[default]
    Hermite,
    /// Windowed sinc with the given half-width.
    Sinc { half_width: usize },
    /// Quantizing effect with the given number of levels.
    BitCrush { levels: u32 },
}

impl ResamplerStrategy {
    /// Converts `samples` from `source_rate` to `target_rate` using this
    /// strategy.
    ///
    /// # Examples
    ///
    /// ```
    /// use seqwave::audio::ResamplerStrategy;
    ///
    /// let out = ResamplerStrategy::Linear.resample(&[0.0, 1.0], 1, 2);
    /// assert_eq!(out, vec![0.0, 0.5, 1.0, 1.0]);
    /// ```
    pub fn resample(&self, samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
        match *self {
            ResamplerStrategy::Nearest => NearestResampler.resample(samples, source_rate, target_rate),
            ResamplerStrategy::Linear => LinearResampler.resample(samples, source_rate, target_rate),
            ResamplerStrategy::Hermite => {
                HermiteResampler.resample(samples, source_rate, target_rate)
            }
            ResamplerStrategy::Sinc { half_width } => {
                SincResampler::new(half_width).resample(samples, source_rate, target_rate)
            }
            ResamplerStrategy::BitCrush { levels } => {
                BitCrushResampler::new(levels).resample(samples, source_rate, target_rate)
            }
        }
    }

    /// Returns true for strategies that alter the signal even when the
    /// rates already match.
    pub fn is_lossy(&self) -> bool {
        matches!(self, ResamplerStrategy::BitCrush { .. })
    }

    /// Parses a strategy name as accepted on the command line.
    ///
    /// Accepts `nearest`, `linear`, `hermite`, `sinc`, `sinc:<half-width>`,
    /// `crush` and `crush:<levels>`.
    pub fn from_name(name: &str) -> Option<Self> {
        let (kind, arg) = match name.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (name, None),
        };
        match (kind.to_ascii_lowercase().as_str(), arg) {
            ("nearest" | "none", None) => Some(Self::Nearest),
            ("linear", None) => Some(Self::Linear),
            ("hermite" | "cubic", None) => Some(Self::Hermite),
            ("sinc", None) => Some(Self::Sinc {
                half_width: DEFAULT_SINC_HALF_WIDTH,
            }),
            ("sinc", Some(width)) => width.parse().ok().map(|half_width| Self::Sinc { half_width }),
            ("crush", None) => Some(Self::BitCrush {
                levels: DEFAULT_CRUSH_LEVELS,
            }),
            ("crush", Some(levels)) => levels.parse().ok().map(|levels| Self::BitCrush { levels }),
            _ => None,
        }
    }
}
