//! PCM rendering.
//!
//! Turns a placement timeline into a mixed multichannel float buffer.
//!
//! Rendering runs in three phases:
//!
//! 1. Every distinct (sound, playback rate) pair is fetched from the
//!    sample provider and resampled to the output rate once, in parallel.
//! 2. Placements are walked in order to build one voice per sounding
//!    placement. Individual cuts shorten and fade the voices they hit.
//! 3. The output buffer is split into `multithreading_slices` disjoint
//!    ranges. Each worker owns one range and mixes every voice that
//!    overlaps it, in placement order. Per-sample summation order is the
//!    same for any slice count, so output is bit-identical regardless of
//!    how the work is split.

use super::buffer::AudioBuffer;
use super::provider::{SampleData, SampleProvider};
use super::settings::EncoderSettings;
use crate::sequence::{
    ms_to_samples, EventKind, Placement, Sequence, SequenceError, TimedEventSet,
};
use crate::wav::{self, PcmHolder, WavError};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Number of output frames mixed between progress reports and
/// cancellation checks.
pub const RENDER_BLOCK_SIZE: usize = 65536;

/// Keeps normalized peaks just under full scale.
const NORMALIZE_EPSILON: f32 = 1e-6;

/// Errors that can occur while rendering.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Timing or event data is unusable. Aborts the render.
    #[error("malformed sequence at event {index}: {reason}")]
    MalformedSequence { index: usize, reason: String },

    /// A sound is missing from the provider. Reported through the log
    /// callback with the first event that uses it; the render continues
    /// with silence.
    #[error("sound not found: {sound_id} (event {index})")]
    SoundNotFound { sound_id: String, index: usize },

    #[error("unsupported channel count: {0}")]
    UnsupportedChannelCount(u16),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("cannot allocate output buffer of {frames} frames x {channels} channels")]
    OutOfMemory { frames: u64, channels: u16 },

    #[error("render cancelled")]
    Cancelled,

    #[error("WAV error: {0}")]
    Wav(#[from] WavError),
}

impl From<SequenceError> for EncodeError {
    fn from(err: SequenceError) -> Self {
        match err {
            SequenceError::MalformedSequence { index, reason } => {
                EncodeError::MalformedSequence { index, reason }
            }
            SequenceError::InvalidTimingRate(rate) => {
                EncodeError::InvalidSettings(format!("timing sample rate {rate}"))
            }
        }
    }
}

/// Receives coarse progress and diagnostics from a render.
///
/// Called from worker threads. Implementations must be cheap and must not
/// block; rendering never waits on them.
pub trait RenderObserver: Send + Sync {
    /// Reports `processed` of `total` output frames mixed.
    fn on_progress(&self, _processed: u64, _total: u64) {}

    /// Reports a recoverable problem.
    fn on_log(&self, _message: &str) {}
}

/// A sample resampled to the output rate, laid out for the output
/// channel count.
struct PreparedSource {
    channels: Vec<Vec<f32>>,
}

impl PreparedSource {
    fn len(&self) -> u64 {
        self.channels.first().map_or(0, |c| c.len() as u64)
    }

    /// Source channel feeding output channel `index`.
    fn channel_for(&self, index: usize) -> &[f32] {
        &self.channels[index.min(self.channels.len() - 1)]
    }
}

/// One sounding placement, ready to mix.
struct Voice<'a> {
    start: u64,
    /// Frames to mix. Shortened by cuts.
    len: u64,
    source: &'a PreparedSource,
    gains: [f32; 2],
    /// Start and length of a linear fade to zero.
    fade: Option<(u64, u64)>,
}

impl Voice<'_> {
    fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Applies a cut at `position`. Returns true if the voice was
    /// sounding there.
    fn cut(&mut self, position: u64, fade_len: u64) -> bool {
        if self.fade.is_some() || position < self.start || position >= self.end() {
            return false;
        }
        self.fade = Some((position, fade_len));
        self.len = self.len.min(position - self.start + fade_len);
        true
    }
}

/// A worker's exclusive range of the output buffer.
struct SliceView<'a> {
    start: u64,
    len: u64,
    channels: Vec<&'a mut [f32]>,
}

/// Shared state for one render.
struct RenderContext<'a> {
    observer: Option<&'a dyn RenderObserver>,
    cancel: &'a AtomicBool,
    processed: AtomicU64,
    total: u64,
}

impl RenderContext<'_> {
    fn log(&self, message: &str) {
        if let Some(observer) = self.observer {
            observer.on_log(message);
        }
    }

    fn advance(&self, frames: u64) {
        let done = self.processed.fetch_add(frames, Ordering::Relaxed) + frames;
        if let Some(observer) = self.observer {
            observer.on_progress(done, self.total);
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Renders placements into a float buffer.
///
/// # Arguments
///
/// * `placements` - Timeline in output-rate samples, sorted by position
/// * `provider` - Source of decoded samples
/// * `settings` - Render configuration
/// * `observer` - Optional progress and log receiver
///
/// # Errors
///
/// Returns `MalformedSequence` for unusable pitch data,
/// `UnsupportedChannelCount`/`InvalidSettings` for bad settings, and
/// `OutOfMemory` if the output cannot be allocated. Missing sounds are
/// not errors.
pub fn render(
    placements: &[Placement],
    provider: &dyn SampleProvider,
    settings: &EncoderSettings,
    observer: Option<&dyn RenderObserver>,
) -> Result<AudioBuffer<f32>, EncodeError> {
    render_with_cancel(placements, provider, settings, observer, &AtomicBool::new(false))
}

fn render_with_cancel(
    placements: &[Placement],
    provider: &dyn SampleProvider,
    settings: &EncoderSettings,
    observer: Option<&dyn RenderObserver>,
    cancel: &AtomicBool,
) -> Result<AudioBuffer<f32>, EncodeError> {
    settings.validate()?;
    let started = Instant::now();

    let placements: Cow<[Placement]> =
        if placements.windows(2).all(|w| w[0].sample_index <= w[1].sample_index) {
            Cow::Borrowed(placements)
        } else {
            let mut sorted = placements.to_vec();
            sorted.sort_by_key(|p| p.sample_index);
            Cow::Owned(sorted)
        };

    let slices = settings.multithreading_slices as usize;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(slices)
        .build()
        .map_err(|e| EncodeError::InvalidSettings(format!("cannot start worker pool: {e}")))?;

    let mut context = RenderContext {
        observer,
        cancel,
        processed: AtomicU64::new(0),
        total: 0,
    };

    // Phase 1: resolve pitch and prepare each distinct source once.
    let mut rates = Vec::with_capacity(placements.len());
    for placement in placements.iter() {
        let rate = match placement.sound_id() {
            Some(_) => Some(
                settings
                    .pitch_mapping
                    .playback_rate(placement.event.value, placement.event.value_scale)
                    .ok_or_else(|| EncodeError::MalformedSequence {
                        index: placement.sequence_index as usize,
                        reason: format!(
                            "pitch {:?} {} gives no playable rate",
                            placement.event.value_scale, placement.event.value
                        ),
                    })?,
            ),
            None => None,
        };
        rates.push(rate);
    }

    let keys: BTreeSet<(&str, u64)> = placements
        .iter()
        .zip(&rates)
        .filter_map(|(p, rate)| Some((p.sound_id()?, rate.as_ref()?.to_bits())))
        .collect();

    let prepared: HashMap<(&str, u64), Option<PreparedSource>> = pool.install(|| {
        keys.into_par_iter()
            .map(|(sound_id, rate_bits)| {
                let source = provider
                    .try_get_pcm(sound_id)
                    .map(|data| prepare(data, f64::from_bits(rate_bits), settings));
                ((sound_id, rate_bits), source)
            })
            .collect()
    });

    // Missing sounds, keyed to the first event that uses them.
    let mut missing: BTreeMap<&str, u64> = BTreeMap::new();
    for (placement, rate) in placements.iter().zip(&rates) {
        let (Some(sound_id), Some(rate)) = (placement.sound_id(), rate) else {
            continue;
        };
        if let Some(None) = prepared.get(&(sound_id, rate.to_bits())) {
            let first = missing.entry(sound_id).or_insert(placement.sequence_index);
            *first = (*first).min(placement.sequence_index);
        }
    }
    for (sound_id, index) in &missing {
        let err = EncodeError::SoundNotFound {
            sound_id: sound_id.to_string(),
            index: *index as usize,
        };
        tracing::warn!(sound = %sound_id, event = index, "{}; substituting silence", err);
        context.log(&err.to_string());
    }

    // Phase 2: build voices and apply individual cuts.
    let fade_len = ms_to_samples(settings.cut_fade_length_ms, settings.sample_rate);
    let mut voices: Vec<Voice> = Vec::new();
    // Voices still sounding, per originating sequence and sound.
    let mut sounding: HashMap<(usize, &str), Vec<usize>> = HashMap::new();

    for (placement, rate) in placements.iter().zip(&rates) {
        if !placement.audible {
            continue;
        }
        match &placement.event.kind {
            EventKind::Sound => {
                let (Some(sound_id), Some(rate)) = (placement.sound_id(), rate) else {
                    continue;
                };
                let Some(Some(source)) = prepared.get(&(sound_id, rate.to_bits())) else {
                    continue;
                };
                if source.len() == 0 {
                    continue;
                }
                sounding
                    .entry((placement.source, sound_id))
                    .or_default()
                    .push(voices.len());
                voices.push(Voice {
                    start: placement.sample_index,
                    len: source.len(),
                    source,
                    gains: channel_gains(
                        placement.event.volume,
                        placement.event.pan,
                        settings.channels,
                    ),
                    fade: None,
                });
            }
            EventKind::IndividualCut {
                sound_ids,
                standard_mode,
            } => {
                let fade = if *standard_mode { fade_len } else { 0 };
                let position = placement.sample_index;
                let mut hit = 0usize;
                for ((source, sound_id), active) in sounding.iter_mut() {
                    if *source != placement.source
                        || (!sound_ids.is_empty() && !sound_ids.contains(*sound_id))
                    {
                        continue;
                    }
                    active.retain(|&index| {
                        let voice = &mut voices[index];
                        if voice.cut(position, fade) {
                            hit += 1;
                            false
                        } else {
                            // Voices that already ended can never be cut.
                            voice.end() > position && voice.fade.is_none()
                        }
                    });
                }
                tracing::trace!(position, hit, "individual cut");
            }
            _ => {}
        }
    }

    // Phase 3: allocate and mix. Trailing silence up to the last placement
    // (pauses, the end marker) is part of the output.
    let last_placement = placements.last().map_or(0, |p| p.sample_index);
    let total = voices
        .iter()
        .map(|v| v.end())
        .max()
        .unwrap_or(0)
        .max(last_placement);
    let max_len = voices.iter().map(|v| v.len).max().unwrap_or(0);
    context.total = total;

    let frames = usize::try_from(total).map_err(|_| EncodeError::OutOfMemory {
        frames: total,
        channels: settings.channels,
    })?;
    let mut buffer =
        AudioBuffer::<f32>::try_new(settings.channels as usize, frames).map_err(|_| {
            EncodeError::OutOfMemory {
                frames: total,
                channels: settings.channels,
            }
        })?;

    let bounds: Vec<u64> = (0..=slices as u64)
        .map(|k| (total as u128 * k as u128 / slices as u128) as u64)
        .collect();
    let mut views: Vec<SliceView> = bounds
        .windows(2)
        .map(|w| SliceView {
            start: w[0],
            len: w[1] - w[0],
            channels: Vec::with_capacity(settings.channels as usize),
        })
        .collect();
    for channel in buffer.channels_mut() {
        let mut rest = channel;
        for view in views.iter_mut() {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(view.len as usize);
            view.channels.push(head);
            rest = tail;
        }
    }

    let context = &context;
    let voices = &voices;
    pool.install(|| {
        views
            .into_par_iter()
            .for_each(|view| mix_slice(view, voices, max_len, context));
    });

    if context.cancelled() {
        return Err(EncodeError::Cancelled);
    }

    if settings.enable_normalization {
        pool.install(|| normalize(&mut buffer));
    }

    if let Some(observer) = observer {
        observer.on_progress(total, total);
    }
    tracing::debug!(
        placements = placements.len(),
        voices = voices.len(),
        frames = total,
        slices,
        missing = missing.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "rendered placements"
    );

    Ok(buffer)
}

/// Resamples a sample to the output rate at the given playback rate.
fn prepare(data: &SampleData, playback_rate: f64, settings: &EncoderSettings) -> PreparedSource {
    let channels = data.buffer.channels();
    if channels.is_empty() {
        return PreparedSource {
            channels: vec![Vec::new()],
        };
    }

    // Mono output mixes the source down before resampling.
    let downmixed;
    let inputs: &[Vec<f32>] = if settings.channels == 1 && channels.len() > 1 {
        let scale = 1.0 / channels.len() as f32;
        downmixed = vec![(0..data.buffer.frames())
            .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect::<Vec<f32>>()];
        &downmixed
    } else {
        channels
    };

    // Playing faster is the same as the source having been recorded at
    // a higher rate.
    let source_rate = ((data.sample_rate as f64 * playback_rate).round() as u32).max(1);
    let channels = inputs
        .iter()
        .map(|samples| {
            if source_rate == settings.sample_rate && !settings.resampler.is_lossy() {
                samples.clone()
            } else {
                settings
                    .resampler
                    .resample(samples, source_rate, settings.sample_rate)
            }
        })
        .collect();

    PreparedSource { channels }
}

/// Linear gain per output channel, with equal-power panning for stereo.
fn channel_gains(volume: f64, pan: f32, channels: u16) -> [f32; 2] {
    let volume = volume as f32;
    if channels == 1 {
        return [volume, volume];
    }
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    [angle.cos() * volume, angle.sin() * volume]
}

/// Mixes every voice overlapping `view` into it, block by block.
fn mix_slice(mut view: SliceView, voices: &[Voice], max_len: u64, context: &RenderContext) {
    let view_end = view.start + view.len;
    let mut block_start = view.start;

    while block_start < view_end {
        if context.cancelled() {
            return;
        }
        let block_end = (block_start + RENDER_BLOCK_SIZE as u64).min(view_end);
        // Voices starting before this can no longer reach the block.
        let first = voices.partition_point(|v| v.start + max_len <= block_start);

        for voice in &voices[first..] {
            if voice.start >= block_end {
                break;
            }
            let from = voice.start.max(block_start);
            let to = voice.end().min(block_end);
            if from >= to {
                continue;
            }

            for (channel_index, out) in view.channels.iter_mut().enumerate() {
                let source = voice.source.channel_for(channel_index);
                let gain = voice.gains[channel_index.min(1)];
                for position in from..to {
                    let mut sample = source[(position - voice.start) as usize] * gain;
                    if let Some((fade_start, fade_len)) = voice.fade {
                        if position >= fade_start {
                            let elapsed = (position - fade_start) as f32;
                            sample *= (1.0 - elapsed / fade_len.max(1) as f32).max(0.0);
                        }
                    }
                    out[(position - view.start) as usize] += sample;
                }
            }
        }

        context.advance(block_end - block_start);
        block_start = block_end;
    }
}

/// Scales the buffer so its peak sits just under 1.0.
fn normalize(buffer: &mut AudioBuffer<f32>) {
    let peak = buffer
        .channels()
        .par_iter()
        .map(|c| c.iter().fold(0.0f32, |peak, s| peak.max(s.abs())))
        .reduce(|| 0.0, f32::max);
    if peak <= 0.0 {
        return;
    }
    let scale = 1.0 / (peak + NORMALIZE_EPSILON);
    buffer
        .channels_mut()
        .collect::<Vec<_>>()
        .into_par_iter()
        .for_each(|channel| channel.iter_mut().for_each(|s| *s *= scale));
    tracing::trace!(peak, scale, "normalized");
}

/// Renders sequences and timelines with fixed settings.
///
/// Holds the cancellation flag for the renders it runs; call
/// [`PcmEncoder::cancel`] from another thread to stop a render early.
///
/// The flag is sticky: once set, every later render on this encoder
/// returns `Cancelled` until [`PcmEncoder::reset_cancel`] is called.
pub struct PcmEncoder {
    settings: EncoderSettings,
    observer: Option<Arc<dyn RenderObserver>>,
    cancel: Arc<AtomicBool>,
}

impl PcmEncoder {
    /// Creates an encoder.
    pub fn new(settings: EncoderSettings) -> Self {
        Self {
            settings,
            observer: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attaches a progress and log observer.
    pub fn with_observer(mut self, observer: Arc<dyn RenderObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the render settings.
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Requests that the running render stop. The render returns
    /// `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Clears a previous cancellation so the encoder can render again.
    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    /// Returns a handle that cancels renders when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Renders placements already expressed in output-rate samples.
    pub fn render(
        &self,
        placements: &[Placement],
        provider: &dyn SampleProvider,
    ) -> Result<AudioBuffer<f32>, EncodeError> {
        render_with_cancel(
            placements,
            provider,
            &self.settings,
            self.observer.as_deref(),
            &self.cancel,
        )
    }

    /// Renders a timeline, converting it from its timing rate to the
    /// output rate.
    pub fn render_set(
        &self,
        set: &TimedEventSet,
        provider: &dyn SampleProvider,
    ) -> Result<AudioBuffer<f32>, EncodeError> {
        if set.timing_sample_rate == self.settings.sample_rate {
            return self.render(&set.placements, provider);
        }
        self.render(&set.placements_at_rate(self.settings.sample_rate), provider)
    }

    /// Calculates placements for a sequence at the output rate and
    /// renders them.
    pub fn render_sequence(
        &self,
        sequence: &Sequence,
        provider: &dyn SampleProvider,
    ) -> Result<AudioBuffer<f32>, EncodeError> {
        let placements = self
            .settings
            .calculator()
            .calculate(sequence, self.settings.sample_rate)?;
        self.render(&placements, provider)
    }

    /// Quantizes a rendered buffer to the configured output format.
    pub fn to_pcm(&self, buffer: &AudioBuffer<f32>) -> PcmHolder {
        PcmHolder::from_f32(buffer, self.settings.sample_rate, self.settings.output_format)
    }

    /// Serializes a rendered buffer as a WAV stream.
    pub fn write_wav<W: Write>(
        &self,
        buffer: &AudioBuffer<f32>,
        writer: &mut W,
    ) -> Result<(), EncodeError> {
        wav::write(writer, &self.to_pcm(buffer))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ResamplerStrategy, SampleLibrary};
    use crate::sequence::{Event, PlacementCalculator, ValueScale};
    use std::sync::Mutex;

    const RATE: u32 = 48000;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            sample_rate: RATE,
            channels: 2,
            multithreading_slices: 1,
            enable_normalization: false,
            resampler: ResamplerStrategy::Nearest,
            ..EncoderSettings::default()
        }
    }

    fn place(sample_index: u64, sequence_index: u64, event: Event) -> Placement {
        Placement {
            sample_index,
            sequence_index,
            source: 0,
            audible: event.is_audible(),
            event,
        }
    }

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
        last_progress: AtomicU64,
        total: AtomicU64,
    }

    impl RenderObserver for Recorder {
        fn on_progress(&self, processed: u64, total: u64) {
            self.last_progress.fetch_max(processed, Ordering::Relaxed);
            self.total.store(total, Ordering::Relaxed);
        }

        fn on_log(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn test_slicing_is_bit_identical() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(noise(30000, 1), 44100));
        library.insert("b", SampleData::mono(noise(7000, 2), 48000));
        let stereo = AudioBuffer::from_channels(vec![noise(12000, 3), noise(12000, 4)]).unwrap();
        library.insert("c", SampleData::new(stereo, 22050));

        let mut events = vec![Event::tempo(1200.0, ValueScale::None)];
        for i in 0..40 {
            let id = ["a", "b", "c"][i % 3];
            events.push(
                Event::sound(id)
                    .with_value((i % 7) as f64 - 3.0, ValueScale::None)
                    .with_pan(((i % 5) as f32 - 2.0) / 2.0)
                    .with_volume(0.3),
            );
            if i % 9 == 4 {
                events.push(Event::individual_cut(["a"], true));
            }
        }
        let sequence = Sequence::new(events);
        let placements = PlacementCalculator::new().calculate(&sequence, RATE).unwrap();

        let base = EncoderSettings {
            resampler: ResamplerStrategy::Hermite,
            enable_normalization: true,
            ..settings()
        };
        let single = render(&placements, &library, &base, None).unwrap();
        assert!(single.frames() > RENDER_BLOCK_SIZE);

        for slices in [2, 3, 7, 16] {
            let sliced = EncoderSettings {
                multithreading_slices: slices,
                ..base.clone()
            };
            let output = render(&placements, &library, &sliced, None).unwrap();
            let same = output
                .channels()
                .iter()
                .zip(single.channels())
                .all(|(a, b)| a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()));
            assert!(same, "{slices} slices differ from a single slice");
        }
    }

    #[test]
    fn test_individual_cut_fades_to_zero() {
        let mut library = SampleLibrary::new();
        library.insert("kick", SampleData::mono(vec![0.5; 48000], RATE));
        library.insert("pad", SampleData::mono(vec![0.0; 60000], RATE));

        let placements = vec![
            place(0, 0, Event::sound("kick")),
            place(0, 1, Event::sound("pad")),
            place(24000, 2, Event::individual_cut(["kick"], true)),
        ];
        let settings = EncoderSettings {
            cut_fade_length_ms: 10,
            ..settings()
        };
        let output = render(&placements, &library, &settings, None).unwrap();
        assert_eq!(output.frames(), 60000);

        for channel in output.channels() {
            let level = channel[0];
            assert!(level > 0.0);
            assert!(channel[..24000].iter().all(|&s| s == level));
            let fade = &channel[24000..24480];
            assert_eq!(fade[0], level);
            assert!(fade.windows(2).all(|w| w[1] < w[0]));
            assert!(channel[24480..].iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_cut_only_hits_named_sounds() {
        let mut library = SampleLibrary::new();
        library.insert("kick", SampleData::mono(vec![0.5; 1000], RATE));
        library.insert("hat", SampleData::mono(vec![0.25; 1000], RATE));

        let placements = vec![
            place(0, 0, Event::sound("kick")),
            place(0, 1, Event::sound("hat")),
            place(100, 2, Event::individual_cut(["kick"], false)),
        ];
        let settings = EncoderSettings {
            channels: 1,
            ..settings()
        };
        let output = render(&placements, &library, &settings, None).unwrap();
        let channel = output.channel(0).unwrap();
        assert_eq!(channel[99], 0.75);
        // Hard cut: the kick stops at once, the hat keeps playing.
        assert_eq!(channel[100], 0.25);
        assert_eq!(channel[999], 0.25);
    }

    #[test]
    fn test_cut_with_empty_set_hits_everything() {
        let mut library = SampleLibrary::new();
        library.insert("kick", SampleData::mono(vec![0.5; 1000], RATE));
        library.insert("hat", SampleData::mono(vec![0.25; 1000], RATE));

        let placements = vec![
            place(0, 0, Event::sound("kick")),
            place(0, 1, Event::sound("hat")),
            place(100, 2, Event::individual_cut(Vec::<String>::new(), false)),
        ];
        let output = render(&placements, &library, &settings(), None).unwrap();
        assert_eq!(output.frames(), 100);
    }

    #[test]
    fn test_cut_does_not_reach_later_instances() {
        let mut library = SampleLibrary::new();
        library.insert("kick", SampleData::mono(vec![0.5; 100], RATE));

        let placements = vec![
            place(0, 0, Event::sound("kick")),
            place(50, 1, Event::individual_cut(["kick"], false)),
            place(60, 2, Event::sound("kick")),
        ];
        let settings = EncoderSettings {
            channels: 1,
            ..settings()
        };
        let output = render(&placements, &library, &settings, None).unwrap();
        let channel = output.channel(0).unwrap();
        assert_eq!(channel[49], 0.5);
        assert_eq!(channel[55], 0.0);
        assert_eq!(channel[60], 0.5);
        assert_eq!(output.frames(), 160);
    }

    #[test]
    fn test_second_event_follows_first() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.5; 4800], RATE));
        library.insert("b", SampleData::mono(vec![0.25; 100], RATE));

        let sequence = Sequence::new(vec![Event::sound("a"), Event::sound("b")]);
        let settings = EncoderSettings {
            combine_delay_ms: 0,
            channels: 1,
            ..settings()
        };
        let placements = settings.calculator().calculate(&sequence, RATE).unwrap();
        let a = &placements[0];
        let b = &placements[1];
        let a_len = library.try_get_pcm("a").unwrap().buffer.frames() as u64;
        assert!(b.sample_index > a.sample_index + a_len);

        let output = PcmEncoder::new(settings)
            .render_sequence(&sequence, &library)
            .unwrap();
        let channel = output.channel(0).unwrap();
        let first_b = channel.iter().position(|&s| s == 0.25).unwrap() as u64;
        assert_eq!(first_b, b.sample_index);
        assert!(first_b > a.sample_index + a_len);
        assert!(channel[4800..first_b as usize].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_missing_sound_is_silent_and_logged() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.5; 100], RATE));
        let placements = vec![
            place(0, 0, Event::sound("a")),
            place(50, 1, Event::sound("ghost")),
        ];

        let recorder = Recorder::default();
        let output = render(&placements, &library, &settings(), Some(&recorder)).unwrap();
        assert_eq!(output.frames(), 100);
        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], "sound not found: ghost (event 1)");
    }

    #[test]
    fn test_missing_sound_names_first_event() {
        let library = SampleLibrary::new();
        let placements = vec![
            place(0, 2, Event::sound("ghost")),
            place(10, 5, Event::sound("ghost").with_value(12.0, ValueScale::None)),
            place(20, 3, Event::sound("ghost")),
        ];

        let recorder = Recorder::default();
        render(&placements, &library, &settings(), Some(&recorder)).unwrap();
        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], "sound not found: ghost (event 2)");
    }

    #[test]
    fn test_pitch_changes_length() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.5; 1000], RATE));

        let up = vec![place(0, 0, Event::sound("a").with_value(12.0, ValueScale::None))];
        assert_eq!(render(&up, &library, &settings(), None).unwrap().frames(), 500);

        let down = vec![place(0, 0, Event::sound("a").with_value(2.0, ValueScale::Divide))];
        assert_eq!(render(&down, &library, &settings(), None).unwrap().frames(), 2000);
    }

    #[test]
    fn test_source_rate_is_converted() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.5; 100], 24000));
        let placements = vec![place(0, 0, Event::sound("a"))];
        let output = render(&placements, &library, &settings(), None).unwrap();
        assert_eq!(output.frames(), 200);
    }

    #[test]
    fn test_pan_and_volume() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![1.0; 10], RATE));

        let left = vec![place(0, 0, Event::sound("a").with_pan(-1.0).with_volume(0.5))];
        let output = render(&left, &library, &settings(), None).unwrap();
        assert!((output.channel(0).unwrap()[0] - 0.5).abs() < 1e-6);
        assert!(output.channel(1).unwrap()[0].abs() < 1e-6);

        let center = vec![place(0, 0, Event::sound("a"))];
        let output = render(&center, &library, &settings(), None).unwrap();
        let l = output.channel(0).unwrap()[0];
        let r = output.channel(1).unwrap()[0];
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalization_peak_under_unity() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.8; 100], RATE));
        let placements = vec![place(0, 0, Event::sound("a")), place(0, 1, Event::sound("a"))];
        let settings = EncoderSettings {
            enable_normalization: true,
            channels: 1,
            ..settings()
        };
        let output = render(&placements, &library, &settings, None).unwrap();
        let peak = output.peak();
        assert!(peak < 1.0);
        assert!(peak > 0.999);
    }

    #[test]
    fn test_render_rejects_invalid_settings() {
        let library = SampleLibrary::new();
        let bad_channels = EncoderSettings {
            channels: 3,
            ..settings()
        };
        assert!(matches!(
            render(&[], &library, &bad_channels, None),
            Err(EncodeError::UnsupportedChannelCount(3))
        ));
    }

    #[test]
    fn test_trailing_pause_extends_output() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.5; 100], RATE));
        let sequence = Sequence::new(vec![Event::sound("a"), Event::pause(4.0)]);
        let settings = EncoderSettings {
            channels: 1,
            ..settings()
        };

        let output = PcmEncoder::new(settings)
            .render_sequence(&sequence, &library)
            .unwrap();
        // One beat for the sound plus four beats of pause, 9600 samples each.
        assert_eq!(output.frames(), 48000);
        let channel = output.channel(0).unwrap();
        assert_eq!(channel[99], 0.5);
        assert!(channel[100..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_silent_timeline_keeps_its_length() {
        let library = SampleLibrary::new();
        let placements = vec![
            place(0, 0, Event::pause(1.0)),
            place(500, 1, Event::sequence_end()),
        ];
        let output = render(&placements, &library, &settings(), None).unwrap();
        assert_eq!(output.frames(), 500);
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_unplayable_pitch_is_malformed() {
        let library = SampleLibrary::new();
        let placements = vec![place(
            0,
            7,
            Event::sound("a").with_value(-200.0, ValueScale::None),
        )];
        let settings = EncoderSettings {
            pitch_mapping: crate::audio::PitchMapping::Percent,
            ..settings()
        };
        assert!(matches!(
            render(&placements, &library, &settings, None),
            Err(EncodeError::MalformedSequence { index: 7, .. })
        ));
    }

    #[test]
    fn test_progress_reaches_total() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.1; 150_000], RATE));
        let placements = vec![place(0, 0, Event::sound("a"))];
        let recorder = Arc::new(Recorder::default());
        let encoder = PcmEncoder::new(EncoderSettings {
            multithreading_slices: 3,
            ..settings()
        })
        .with_observer(recorder.clone());

        encoder.render(&placements, &library).unwrap();
        assert_eq!(recorder.total.load(Ordering::Relaxed), 150_000);
        assert_eq!(recorder.last_progress.load(Ordering::Relaxed), 150_000);
    }

    #[test]
    fn test_cancelled_render() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.1; 1000], RATE));
        let placements = vec![place(0, 0, Event::sound("a"))];
        let encoder = PcmEncoder::new(settings());
        encoder.cancel();
        assert!(matches!(
            encoder.render(&placements, &library),
            Err(EncodeError::Cancelled)
        ));
        // Still cancelled until reset.
        assert!(matches!(
            encoder.render(&placements, &library),
            Err(EncodeError::Cancelled)
        ));

        encoder.reset_cancel();
        let output = encoder.render(&placements, &library).unwrap();
        assert_eq!(output.frames(), 1000);
    }

    #[test]
    fn test_render_set_rescales_timeline() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.5; 10], 24000));
        let sequence = Sequence::new(vec![Event::sound("a"), Event::sound("a")]);
        let set = PlacementCalculator::new()
            .calculate_many(&[sequence], 48000)
            .unwrap();

        let encoder = PcmEncoder::new(EncoderSettings {
            sample_rate: 24000,
            channels: 1,
            ..settings()
        });
        let output = encoder.render_set(&set, &library).unwrap();
        // Second hit lands one beat (4800 samples at 24 kHz) in; the end
        // marker sits one beat after it.
        assert_eq!(output.frames(), 9600);
        assert_eq!(output.channel(0).unwrap()[4800], 0.5);
    }

    #[test]
    fn test_write_wav_entry_point() {
        let mut library = SampleLibrary::new();
        library.insert("a", SampleData::mono(vec![0.5; 10], RATE));
        let encoder = PcmEncoder::new(settings());
        let buffer = encoder
            .render(&[place(0, 0, Event::sound("a"))], &library)
            .unwrap();

        let mut bytes = Vec::new();
        encoder.write_wav(&buffer, &mut bytes).unwrap();
        let holder = wav::read(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(holder.channels(), 2);
        assert_eq!(holder.frames(), 10);
        assert_eq!(holder.sample_rate, RATE);
    }
}
