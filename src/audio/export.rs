//! Audio export functionality.
//!
//! Renders sequences through the encoder and writes the result to WAV
//! files in the configured sample format.

use crate::audio::encoder::{PcmEncoder, RenderObserver};
use crate::audio::provider::SampleProvider;
use crate::audio::settings::EncoderSettings;
use crate::audio::AudioBuffer;
use crate::sequence::{samples_to_seconds, Sequence, TimedEventSet};
use crate::wav;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// What an export produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportSummary {
    /// Frames written per channel.
    pub frames: u64,
    /// Length of the written audio in seconds.
    pub duration_seconds: f64,
    /// Peak absolute sample value before quantization.
    pub peak: f32,
}

/// Forwards progress as a fraction to a plain callback.
struct ProgressCallback<F>(F);

impl<F: Fn(f32) + Send + Sync> RenderObserver for ProgressCallback<F> {
    fn on_progress(&self, processed: u64, total: u64) {
        if total > 0 {
            (self.0)(processed as f32 / total as f32);
        }
    }

    fn on_log(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

fn encoder<F>(settings: &EncoderSettings, progress_callback: Option<F>) -> PcmEncoder
where
    F: Fn(f32) + Send + Sync + 'static,
{
    let encoder = PcmEncoder::new(settings.clone());
    match progress_callback {
        Some(callback) => encoder.with_observer(Arc::new(ProgressCallback(callback))),
        None => encoder,
    }
}

fn write_output(
    encoder: &PcmEncoder,
    buffer: &AudioBuffer<f32>,
    output_path: &Path,
    started: Instant,
) -> Result<ExportSummary> {
    let holder = encoder.to_pcm(buffer);
    wav::write_file(output_path, &holder).with_context(|| {
        format!("Failed to write output WAV file: {}", output_path.display())
    })?;

    let frames = buffer.frames() as u64;
    let summary = ExportSummary {
        frames,
        duration_seconds: samples_to_seconds(frames, encoder.settings().sample_rate),
        peak: buffer.peak(),
    };
    tracing::info!(
        path = %output_path.display(),
        frames,
        seconds = summary.duration_seconds,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "exported WAV"
    );
    Ok(summary)
}

/// Exports a sequence to a WAV file.
///
/// # Arguments
///
/// * `sequence` - The sequence to render
/// * `provider` - Source of the samples the sequence uses
/// * `settings` - Render and output format settings
/// * `output_path` - Path for the output WAV file
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0)
///
/// # Errors
///
/// Returns error if:
/// - The sequence is malformed or the settings are invalid
/// - The output cannot be allocated
/// - The output file cannot be written
pub fn export_to_wav<P, F>(
    sequence: &Sequence,
    provider: &dyn SampleProvider,
    settings: &EncoderSettings,
    output_path: P,
    progress_callback: Option<F>,
) -> Result<ExportSummary>
where
    P: AsRef<Path>,
    F: Fn(f32) + Send + Sync + 'static,
{
    let started = Instant::now();
    let encoder = encoder(settings, progress_callback);
    let buffer = encoder
        .render_sequence(sequence, provider)
        .context("Failed to render sequence")?;
    write_output(&encoder, &buffer, output_path.as_ref(), started)
}

/// Exports a precomputed timeline to a WAV file.
///
/// The timeline may have been computed at any timing rate; indices are
/// rescaled to the output rate.
pub fn export_timeline_to_wav<P, F>(
    set: &TimedEventSet,
    provider: &dyn SampleProvider,
    settings: &EncoderSettings,
    output_path: P,
    progress_callback: Option<F>,
) -> Result<ExportSummary>
where
    P: AsRef<Path>,
    F: Fn(f32) + Send + Sync + 'static,
{
    let started = Instant::now();
    let encoder = encoder(settings, progress_callback);
    let buffer = encoder
        .render_set(set, provider)
        .context("Failed to render timeline")?;
    write_output(&encoder, &buffer, output_path.as_ref(), started)
}

/// Renders several sequences into one WAV file.
///
/// Sequences are laid out according to `settings.batch_layout`.
///
/// # Returns
///
/// The combined timeline alongside the summary, so it can be cached.
pub fn export_batch_to_wav<P, F>(
    sequences: &[Sequence],
    provider: &dyn SampleProvider,
    settings: &EncoderSettings,
    output_path: P,
    progress_callback: Option<F>,
) -> Result<(TimedEventSet, ExportSummary)>
where
    P: AsRef<Path>,
    F: Fn(f32) + Send + Sync + 'static,
{
    let set = settings
        .calculator()
        .calculate_many(sequences, settings.sample_rate)
        .context("Failed to resolve sequence timing")?;
    let summary = export_timeline_to_wav(&set, provider, settings, output_path, progress_callback)?;
    Ok((set, summary))
}
