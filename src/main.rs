use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dialoguer::{Confirm, FuzzySelect};
use duckvert::{
    default_destination, mirror_into, Converter, EngineConfig, OutputFormat, Progress, ProgressPhase, RunOutcome,
    RunSummary,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Mirror a folder of audio files into MP3, ALAC or FLAC using ffmpeg.")]
struct Args {
    /// Folder to scan for audio files
    source: PathBuf,

    /// Destination folder (defaults to "<source> - Duckvert" next to the source)
    #[arg(conflicts_with = "into")]
    dest: Option<PathBuf>,

    /// Create the mirror inside this folder, named after the source folder
    #[arg(long)]
    into: Option<PathBuf>,

    /// Output format: mp3, alac or flac
    #[arg(long, short)]
    format: Option<OutputFormat>,

    /// Number of files converted at once (defaults to the CPU core count)
    #[arg(long, short)]
    workers: Option<usize>,

    /// Kill a single conversion that runs longer than this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Config file to use instead of the default locations
    #[arg(long)]
    config: Option<PathBuf>,

    /// Don't ask before writing into a folder that already has content
    #[arg(long, short, default_value_t = false)]
    yes: bool,

    /// Print the final summary as JSON on standard output
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log every file as it is converted
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let mut cfg = EngineConfig::load(args.config.as_deref()).context("loading config")?;
    if args.workers.is_some() {
        cfg.workers = args.workers;
    }
    if args.timeout.is_some() {
        cfg.task_timeout_secs = args.timeout;
    }
    if args.ffmpeg.is_some() {
        cfg.ffmpeg_path = args.ffmpeg.clone();
    }
    let interactive = std::io::stdin().is_terminal();

    let format = match args.format.or(cfg.default_format) {
        Some(format) => format,
        None if interactive => prompt_format()?,
        None => return Err(anyhow!("--format is required when not running interactively")),
    };

    let destination = match (&args.dest, &args.into) {
        (Some(dest), _) => dest.clone(),
        (None, Some(parent)) => mirror_into(parent, &args.source)?,
        (None, None) => default_destination(&args.source, &cfg.destination_suffix)?,
    };

    let converter = Converter::with_config(cfg)?;
    let invoker = converter.invoker();
    if !invoker.engine_available() {
        return Err(anyhow!(
            "ffmpeg was not found at '{}'. Install it or pass --ffmpeg.",
            invoker.engine().display()
        ));
    }

    if has_content(&destination) && !args.yes {
        if interactive {
            let proceed = Confirm::new()
                .with_prompt(format!(
                    "Destination {} already has files. Existing conversions will be overwritten. Continue?",
                    destination.display()
                ))
                .default(false)
                .interact()?;
            if !proceed {
                println!("Operation cancelled.");
                return Ok(ExitCode::SUCCESS);
            }
        } else {
            warn!(destination = %destination.display(), "Destination already has files; existing conversions will be overwritten");
        }
    }

    let mut progress_bar: Option<ProgressBar> = None;
    let outcome = converter
        .convert_tree(&args.source, &destination, format, |progress| {
            render_progress(&mut progress_bar, &progress)
        })
        .with_context(|| format!("converting {}", args.source.display()))?;

    if let Some(pb) = progress_bar.take() {
        pb.finish_with_message("Done");
    }

    match outcome {
        RunOutcome::Empty => {
            println!("No files found in {}", args.source.display());
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Completed(summary) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary).context("serializing summary")?);
            } else {
                print_summary(&summary, &destination);
            }
            Ok(if summary.all_succeeded() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "duckvert=debug,warn"
    } else {
        "duckvert=info,warn"
    }
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn prompt_format() -> Result<OutputFormat> {
    let labels: Vec<String> = OutputFormat::ALL.iter().map(|f| f.to_string()).collect();
    let selection = FuzzySelect::with_theme(&dialoguer::theme::ColorfulTheme::default())
        .with_prompt("Output format")
        .default(0)
        .items(&labels)
        .interact()?;
    Ok(OutputFormat::ALL[selection])
}

fn has_content(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn render_progress(bar: &mut Option<ProgressBar>, progress: &Progress) {
    match progress.phase {
        ProgressPhase::Scanning => println!("{}", progress.message),
        ProgressPhase::NothingToDo => {}
        ProgressPhase::Converting => {
            let pb = bar.get_or_insert_with(|| {
                let pb = ProgressBar::new(progress.total as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                pb
            });
            pb.set_position(progress.completed as u64);
            if progress.failed > 0 {
                pb.set_message(format!("{} failed", progress.failed));
            }
        }
        ProgressPhase::Complete => {
            if let Some(pb) = bar.as_ref() {
                pb.set_position(progress.completed as u64);
            }
        }
    }
}

fn print_summary(summary: &RunSummary, destination: &Path) {
    println!("\nCompleted in {:.2}s!", summary.elapsed.as_secs_f64());
    println!(
        "{} files processed: {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    );
    println!("Output written to {}", destination.display());

    if !summary.failures.is_empty() {
        println!("\nFailed files:");
        for failure in &summary.failures {
            println!("  {}: {}", failure.task.source.display(), failure.exit);
        }
    }
}
