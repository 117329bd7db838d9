//! seqwave - Render sound sequences to WAV files.
//!
//! Reads sequences in their JSON interchange form, resolves their timing,
//! mixes the referenced samples and writes one WAV file per input.
//!
//! # Usage
//!
//! ```bash
//! seqwave -i song.json                       # writes song.wav
//! seqwave -i a.json b.json -o a.wav b.wav -s 44100
//! seqwave -i a.json b.json --batch -o both.wav
//! ```
//!
//! Samples are looked up as `<download-location>/<sound>.wav`. Set
//! `RUST_LOG=seqwave=debug` for timing details.

use anyhow::{bail, Context, Result};
use clap::Parser;
use seqwave::audio::{
    export_batch_to_wav, export_timeline_to_wav, export_to_wav, EncoderSettings, ExportSummary,
    ResamplerStrategy, SampleLibrary,
};
use seqwave::sequence::Sequence;
use seqwave::wav::SampleFormat;
use std::path::{Path, PathBuf};

/// Command-line options.
#[derive(Parser)]
#[command(name = "seqwave", version, about = "Render sound sequences to WAV")]
struct Cli {
    /// Sequence files to render
    #[arg(short, long, num_args = 1.., required = true)]
    input: Vec<PathBuf>,

    /// Output WAV files, one per input (defaults to <input>.wav)
    #[arg(short, long, num_args = 1..)]
    output: Vec<PathBuf>,

    /// Output sample rate in Hz [default: 48000]
    #[arg(short, long)]
    sample_rate: Option<u32>,

    /// Directory holding one <sound>.wav file per sound id
    #[arg(long, env = "SEQWAVE_SAMPLES", default_value = "samples")]
    download_location: PathBuf,

    /// JSON file with encoder settings
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Render all inputs into a single file
    #[arg(long)]
    batch: bool,

    /// Also write the computed timeline next to each output
    #[arg(long)]
    timeline: bool,

    /// Number of parallel mixing slices
    #[arg(long)]
    slices: Option<u32>,

    /// Disable peak normalization
    #[arg(long)]
    no_normalize: bool,

    /// Resampler: nearest, linear, hermite, sinc[:width], crush[:levels]
    #[arg(long, value_parser = parse_resampler)]
    resampler: Option<ResamplerStrategy>,

    /// Output sample format: 8, 16, 24, 32, 32f, 64f
    #[arg(long, value_parser = parse_bit_depth)]
    bit_depth: Option<SampleFormat>,
}

fn parse_resampler(name: &str) -> Result<ResamplerStrategy, String> {
    ResamplerStrategy::from_name(name).ok_or_else(|| format!("unknown resampler '{name}'"))
}

fn parse_bit_depth(name: &str) -> Result<SampleFormat, String> {
    SampleFormat::from_name(name).ok_or_else(|| format!("unsupported bit depth '{name}'"))
}

impl Cli {
    /// Builds encoder settings from the settings file and flag overrides.
    fn settings(&self) -> Result<EncoderSettings> {
        let mut settings = match &self.settings {
            Some(path) => EncoderSettings::load_from_file(path)
                .with_context(|| format!("Failed to load settings: {}", path.display()))?,
            None => EncoderSettings::default(),
        };
        if let Some(rate) = self.sample_rate {
            settings.sample_rate = rate;
        }
        if let Some(slices) = self.slices {
            settings.multithreading_slices = slices;
        }
        if self.no_normalize {
            settings.enable_normalization = false;
        }
        if let Some(resampler) = self.resampler {
            settings.resampler = resampler;
        }
        if let Some(format) = self.bit_depth {
            settings.output_format = format;
        }
        settings.validate().context("Invalid encoder settings")?;
        Ok(settings)
    }

    /// Pairs inputs with output paths.
    fn outputs(&self) -> Result<Vec<PathBuf>> {
        let expected = if self.batch { 1 } else { self.input.len() };
        if self.output.is_empty() {
            return Ok(self
                .input
                .iter()
                .take(expected)
                .map(|input| input.with_extension("wav"))
                .collect());
        }
        if self.output.len() != expected {
            bail!(
                "{} input(s) need {} output path(s), got {}",
                self.input.len(),
                expected,
                self.output.len()
            );
        }
        Ok(self.output.clone())
    }
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let outputs = match cli.outputs() {
        Ok(outputs) => outputs,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let missing_inputs: Vec<&PathBuf> = cli.input.iter().filter(|p| !p.exists()).collect();
    if !missing_inputs.is_empty() {
        for path in missing_inputs {
            eprintln!("Error: input file not found: {}", path.display());
        }
        std::process::exit(1);
    }
    if !cli.download_location.is_dir() {
        eprintln!(
            "Error: sample directory not found: {}",
            cli.download_location.display()
        );
        std::process::exit(1);
    }

    let settings = cli.settings()?;
    let mut library = SampleLibrary::new();

    if cli.batch {
        if let Err(e) = render_batch(&cli, &settings, &mut library, &outputs[0]) {
            eprintln!("Error: {e:#}");
            tracing::error!("Batch render failed: {:?}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut failures = 0;
    for (input, output) in cli.input.iter().zip(&outputs) {
        match render_file(&cli, &settings, &mut library, input, output) {
            Ok(summary) => {
                println!(
                    "{} -> {} ({:.2}s)",
                    input.display(),
                    output.display(),
                    summary.duration_seconds
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("Error: {}: {e:#}", input.display());
                tracing::error!("Render of {} failed: {:?}", input.display(), e);
            }
        }
    }

    if failures == cli.input.len() {
        std::process::exit(1);
    }
    Ok(())
}

/// Loads the samples a sequence needs into the shared library.
fn load_samples(cli: &Cli, library: &mut SampleLibrary, sequence: &Sequence) {
    let missing = library.load_directory(&cli.download_location, sequence.used_sounds());
    if !missing.is_empty() {
        eprintln!(
            "Warning: {} sound(s) missing and rendered as silence: {}",
            missing.len(),
            missing.into_iter().collect::<Vec<_>>().join(", ")
        );
    }
}

fn render_file(
    cli: &Cli,
    settings: &EncoderSettings,
    library: &mut SampleLibrary,
    input: &Path,
    output: &Path,
) -> Result<ExportSummary> {
    let sequence = Sequence::load_from_file(input)
        .with_context(|| format!("Failed to load sequence: {}", input.display()))?;
    load_samples(cli, library, &sequence);

    if !cli.timeline {
        return export_to_wav(&sequence, &*library, settings, output, None::<fn(f32)>);
    }

    let set = settings
        .calculator()
        .calculate_many(std::slice::from_ref(&sequence), settings.sample_rate)
        .context("Failed to resolve sequence timing")?;
    let summary = export_timeline_to_wav(&set, &*library, settings, output, None::<fn(f32)>)?;
    let timeline_path = output.with_extension("timeline");
    set.save_to_binary(&timeline_path)
        .with_context(|| format!("Failed to write timeline: {}", timeline_path.display()))?;
    Ok(summary)
}

fn render_batch(
    cli: &Cli,
    settings: &EncoderSettings,
    library: &mut SampleLibrary,
    output: &Path,
) -> Result<()> {
    let mut sequences = Vec::with_capacity(cli.input.len());
    for input in &cli.input {
        let sequence = Sequence::load_from_file(input)
            .with_context(|| format!("Failed to load sequence: {}", input.display()))?;
        load_samples(cli, library, &sequence);
        sequences.push(sequence);
    }

    let (set, summary) =
        export_batch_to_wav(&sequences, &*library, settings, output, None::<fn(f32)>)?;
    println!(
        "{} sequence(s) -> {} ({:.2}s)",
        sequences.len(),
        output.display(),
        summary.duration_seconds
    );

    if cli.timeline {
        let timeline_path = output.with_extension("timeline");
        set.save_to_binary(&timeline_path)
            .with_context(|| format!("Failed to write timeline: {}", timeline_path.display()))?;
    }
    Ok(())
}
