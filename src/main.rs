use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam::channel::bounded;
use image::RgbaImage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use chroma_consensus::ingest::{hasher, scanner};
use chroma_consensus::media::{
    FfmpegBackend, FfmpegHandle, FrameExtractor, FrameSample, MediaBlob, MediaHandle, MediaSource,
    SourceLoader,
};
use chroma_consensus::sampling::{self, SampleStrategy};
use chroma_consensus::utils::config::{self, FfmpegConfig, SamplingConfig, Settings};
use chroma_consensus::{FrameSampler, FrameStatus};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (`KEY=VALUE` lines, or JSON sampling options when named *.json).
    #[arg(short, long, default_value = ".env", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the timestamps that would be sampled from a clip.
    Plan {
        /// Clip length in seconds.
        #[arg(short, long)]
        duration: f64,

        #[command(flatten)]
        sampling: SamplingArgs,
    },
    /// Extract the planned frames of a video (or every video in a directory) as PNG files.
    Frames {
        /// Video file, directory, or `-` to read a blob from stdin.
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,

        /// Declared MIME type for stdin input; sniffed when omitted.
        #[arg(long, default_value = "")]
        mime: String,

        /// Worker threads when INPUT is a directory.
        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        #[arg(long)]
        load_timeout_ms: Option<u64>,

        #[arg(long)]
        seek_timeout_ms: Option<u64>,

        #[command(flatten)]
        sampling: SamplingArgs,
    },
}

#[derive(Args, Debug)]
struct SamplingArgs {
    #[arg(short = 'n', long)]
    count: Option<usize>,

    #[arg(short, long, value_enum)]
    strategy: Option<SampleStrategy>,

    /// Cap on the seconds eligible for sampling.
    #[arg(short, long)]
    max_duration: Option<f64>,
}

impl SamplingArgs {
    fn apply(&self, base: &SamplingConfig) -> Result<SamplingConfig> {
        let merged = SamplingConfig {
            frame_sample_count: self.count.unwrap_or(base.frame_sample_count),
            sample_strategy: self.strategy.unwrap_or(base.sample_strategy),
            max_duration: self.max_duration.unwrap_or(base.max_duration),
        };
        merged.validate()?;
        Ok(merged)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FrameTally {
    written: usize,
    skipped: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let settings = config::load_settings(&cli.config)?;

    match cli.command {
        Command::Plan { duration, sampling: args } => {
            let opts = args.apply(&settings.sampling)?;
            let plan = sampling::plan(
                duration,
                opts.frame_sample_count,
                opts.sample_strategy,
                opts.max_duration,
            )?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Command::Frames {
            input,
            out,
            mime,
            workers,
            load_timeout_ms,
            seek_timeout_ms,
            sampling: args,
        } => {
            let mut settings = settings;
            settings.sampling = args.apply(&settings.sampling)?;
            if let Some(ms) = load_timeout_ms {
                settings.timeouts.load = Duration::from_millis(ms);
            }
            if let Some(ms) = seek_timeout_ms {
                settings.timeouts.seek = Duration::from_millis(ms);
            }
            std::fs::create_dir_all(&out)
                .with_context(|| format!("Failed to create output directory {:?}", out))?;
            run_frames(&settings, &input, &out, &mime, workers.max(1))
        }
    }
}

fn run_frames(
    settings: &Settings,
    input: &Path,
    out: &Path,
    mime: &str,
    workers: usize,
) -> Result<()> {
    let backend = Arc::new(FfmpegBackend::new(settings.ffmpeg.clone()));
    let loader = SourceLoader::new(backend).with_timeout(settings.timeouts.load);
    let sampler = FrameSampler::new(
        settings.sampling.clone(),
        FrameExtractor::with_timeout(settings.timeouts.seek),
    );
    let ffmpeg = &settings.ffmpeg;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} frames {msg}")
            .map_err(|e| anyhow!("Invalid progress template: {}", e))?,
    );

    let tally = if input == Path::new("-") {
        let mut bytes = Vec::new();
        std::io::stdin()
            .read_to_end(&mut bytes)
            .context("Failed to read stdin")?;
        info!("Read {} bytes from stdin", bytes.len());
        let source = MediaSource::Blob(MediaBlob::new(bytes, mime));
        extract_source(&loader, &sampler, source, out, "stdin", &bar)?
    } else if input.is_dir() {
        run_directory(ffmpeg, &loader, &sampler, input, out, workers, &bar)?
    } else {
        extract_file(ffmpeg, &loader, &sampler, input, out, &bar)?
    };

    bar.finish_and_clear();
    info!(
        "Wrote {} frames to {:?} ({} skipped)",
        tally.written, out, tally.skipped
    );
    Ok(())
}

fn run_directory(
    ffmpeg: &FfmpegConfig,
    loader: &SourceLoader,
    sampler: &FrameSampler,
    input: &Path,
    out: &Path,
    workers: usize,
    bar: &ProgressBar,
) -> Result<FrameTally> {
    let (scan_tx, scan_rx) = bounded::<PathBuf>(64);
    let (done_tx, done_rx) = bounded::<FrameTally>(64);

    thread::scope(|scope| {
        let root = input.to_path_buf();
        scope.spawn(move || {
            info!("Scanner started");
            match scanner::scan_directory(&root, scan_tx) {
                Ok(found) => info!("Scanner finished, {} videos queued", found),
                Err(e) => error!("Scanner failed: {}", e),
            }
        });

        for i in 0..workers {
            let rx = scan_rx.clone();
            let tx = done_tx.clone();
            scope.spawn(move || {
                info!("Worker {} started", i);
                // Each worker owns its handles; seeks never overlap on one handle.
                for path in rx {
                    match extract_file(ffmpeg, loader, sampler, &path, out, bar) {
                        Ok(tally) => {
                            let _ = tx.send(tally);
                        }
                        Err(e) => error!("Frame extraction failed for {:?}: {:#}", path, e),
                    }
                }
                info!("Worker {} finished", i);
            });
        }
        drop(done_tx);

        let mut total = FrameTally::default();
        for tally in done_rx {
            total.written += tally.written;
            total.skipped += tally.skipped;
        }
        Ok(total)
    })
}

fn extract_file(
    ffmpeg: &FfmpegConfig,
    loader: &SourceLoader,
    sampler: &FrameSampler,
    path: &Path,
    out: &Path,
    bar: &ProgressBar,
) -> Result<FrameTally> {
    let digest = hasher::calculate_hash(path)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let label = format!("{}-{}", stem, &digest[..8]);

    let mut handle = FfmpegHandle::open(path, ffmpeg.clone());
    handle.set_muted(true);
    extract_source(
        loader,
        sampler,
        MediaSource::Attached(&mut handle),
        out,
        &label,
        bar,
    )
}

fn extract_source(
    loader: &SourceLoader,
    sampler: &FrameSampler,
    source: MediaSource<'_>,
    out: &Path,
    label: &str,
    bar: &ProgressBar,
) -> Result<FrameTally> {
    let mut loaded = loader
        .load(source)
        .with_context(|| format!("Failed to load {}", label))?;
    let plan = sampler
        .plan_for(&loaded)
        .with_context(|| format!("Failed to plan frames for {}", label))?;
    bar.inc_length(plan.len() as u64);
    bar.set_message(label.to_string());

    let mut index = 0;
    let frames = sampler.run(&mut loaded, &plan, |sample| {
        let status = match save_frame(sample, out, label, index) {
            Ok(()) => FrameStatus::Accepted,
            Err(e) => {
                error!("{}: {:#}", label, e);
                FrameStatus::Skipped {
                    reason: e.to_string(),
                }
            }
        };
        index += 1;
        status
    });
    loaded.release();
    bar.inc(plan.len() as u64);

    let written = frames
        .iter()
        .filter(|f| f.status == FrameStatus::Accepted)
        .count();
    Ok(FrameTally {
        written,
        skipped: frames.len() - written,
    })
}

fn save_frame(sample: FrameSample, out: &Path, label: &str, index: usize) -> Result<()> {
    let digest = hasher::frame_digest(&sample.pixels, sample.width, sample.height);
    let name = format!(
        "{}_{:02}_{:08.3}s_{}.png",
        label,
        index,
        sample.timestamp,
        &digest[..12]
    );
    let image = RgbaImage::from_raw(sample.width, sample.height, sample.pixels)
        .ok_or_else(|| anyhow!("Frame buffer does not match its dimensions"))?;
    image
        .save(out.join(&name))
        .with_context(|| format!("Failed to write {}", name))
}
