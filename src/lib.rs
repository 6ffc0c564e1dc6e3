//! # duckvert - batch audio converter
//!
//! `duckvert` converts every audio file under a folder into another codec,
//! writing the results into a destination folder that mirrors the source
//! layout. Each file is handed to ffmpeg, and files are converted in parallel
//! on a bounded worker pool.
//!
//! ## Features
//!
//! - Recursive discovery of flac, aac, aiff, m4a, ogg, opus, raw, wav, wma and webm files
//! - MP3, ALAC and FLAC output
//! - One worker per CPU core by default, configurable
//! - Per-file results: a file that fails never stops the batch
//! - Progress reporting for integration with UI applications
//!
//! ## Example
//!
//! ```no_run
//! use duckvert::{Converter, OutputFormat, RunOutcome};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = Converter::new();
//! let outcome = converter.convert_tree(
//!     Path::new("Music"),
//!     Path::new("Music - Duckvert"),
//!     OutputFormat::Mp3,
//!     |_| {},
//! )?;
//!
//! match outcome {
//!     RunOutcome::Empty => println!("No files found"),
//!     RunOutcome::Completed(summary) => {
//!         println!("{} converted, {} failed", summary.succeeded, summary.failed);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress Reporting
//!
//! The callback receives a [`Progress`] after discovery, after every finished
//! file and once at the end:
//!
//! ```no_run
//! use duckvert::{Converter, OutputFormat, ProgressPhase};
//! use std::path::Path;
//!
//! let converter = Converter::new();
//! converter.convert_tree(
//!     Path::new("Music"),
//!     Path::new("Music - Duckvert"),
//!     OutputFormat::Flac,
//!     |progress| match progress.phase {
//!         ProgressPhase::Scanning => println!("Scanning files..."),
//!         ProgressPhase::NothingToDo => println!("No files found"),
//!         ProgressPhase::Converting => {
//!             println!("{} ({:.1}%)", progress.message, progress.percentage());
//!         }
//!         ProgressPhase::Complete => println!("{}", progress.message),
//!     },
//! ).unwrap();
//! ```

pub mod config;
pub mod discover;
pub mod error;
pub mod format;
pub mod invoke;
pub mod progress;
pub mod scheduler;

use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub use config::EngineConfig;
pub use discover::{default_destination, discover, mirror_into, reject_collisions, ConversionTask};
pub use error::{EngineError, Result};
pub use format::{is_audio_file_name, FormatSpec, OutputFormat, AUDIO_EXTENSIONS};
pub use invoke::{ExitInfo, Invoker, JobResult, TranscodeInvoker};
pub use progress::{Progress, ProgressAggregator, ProgressPhase, RunOutcome, RunSummary};
pub use scheduler::{ResultStream, Scheduler};

/// Main entry point: discovers, schedules and tallies a conversion run
#[derive(Debug, Clone)]
pub struct Converter {
    config: EngineConfig,
}

impl Converter {
    /// Create a new converter with default configuration
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Create a converter with custom configuration
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Load configuration from a file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: EngineConfig::from_file(path)?,
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The scheduler this converter dispatches work on
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.worker_count())
    }

    /// The ffmpeg invoker built from the configuration
    pub fn invoker(&self) -> TranscodeInvoker {
        TranscodeInvoker::new(self.config.resolve_engine()).with_timeout(self.config.task_timeout())
    }

    /// Convert every audio file under `source` into `format`, mirroring the
    /// folder layout under `destination`.
    ///
    /// # Arguments
    ///
    /// * `source` - Existing folder to scan
    /// * `destination` - Root of the mirrored tree, created as needed
    /// * `format` - Target format
    /// * `on_progress` - Called on the calling thread with every [`Progress`] update
    ///
    /// # Errors
    ///
    /// Only failures that prevent the run from starting are returned. Files
    /// that fail to convert are counted in the [`RunSummary`].
    pub fn convert_tree<F>(&self, source: &Path, destination: &Path, format: OutputFormat, mut on_progress: F) -> Result<RunOutcome>
    where
        F: FnMut(Progress),
    {
        on_progress(Progress::scanning());
        let tasks = discover(source, destination, &format.spec())?;

        if tasks.is_empty() {
            info!(source = %source.display(), "No convertible files found");
            on_progress(Progress::nothing_to_do());
            return Ok(RunOutcome::Empty);
        }

        info!(
            files = tasks.len(),
            format = %format,
            workers = self.config.worker_count(),
            destination = %destination.display(),
            "Starting conversion"
        );
        self.run_tasks(tasks, self.invoker(), on_progress)
    }

    /// Run an already built task list through `invoker`.
    ///
    /// Tasks whose destination clashes with another task are not dispatched;
    /// they are reported as failed results first. Progress is reported once
    /// before the first result, after every result and once more with the
    /// final summary.
    pub fn run_tasks<I, F>(&self, tasks: Vec<ConversionTask>, invoker: I, mut on_progress: F) -> Result<RunOutcome>
    where
        I: Invoker + 'static,
        F: FnMut(Progress),
    {
        if tasks.is_empty() {
            on_progress(Progress::nothing_to_do());
            return Ok(RunOutcome::Empty);
        }

        let mut aggregator = ProgressAggregator::new(tasks.len());
        let (tasks, rejected) = reject_collisions(tasks);
        let results = self.scheduler().run(tasks, Arc::new(invoker))?;
        on_progress(aggregator.initial());

        for result in rejected.into_iter().chain(results) {
            on_progress(aggregator.record(result));
        }

        let summary = aggregator.finish();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed = ?summary.elapsed,
            "Conversion finished"
        );
        on_progress(Progress::complete(&summary));
        Ok(RunOutcome::Completed(summary))
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct AlwaysOk;

    impl Invoker for AlwaysOk {
        fn run(&self, task: &ConversionTask) -> JobResult {
            JobResult::new(task.clone(), ExitInfo::Exited(0), Duration::ZERO)
        }
    }

    #[test]
    fn test_with_config_validates() {
        let cfg = EngineConfig {
            workers: Some(0),
            ..Default::default()
        };
        assert!(Converter::with_config(cfg).is_err());
    }

    #[test]
    fn test_scheduler_width_follows_config() {
        let cfg = EngineConfig {
            workers: Some(3),
            ..Default::default()
        };
        let converter = Converter::with_config(cfg).unwrap();
        assert_eq!(converter.scheduler().concurrency(), 3);
    }

    #[test]
    fn test_invoker_follows_config() {
        let cfg = EngineConfig {
            ffmpeg_path: Some("/usr/local/bin/ffmpeg".into()),
            task_timeout_secs: Some(30),
            ..Default::default()
        };
        let invoker = Converter::with_config(cfg).unwrap().invoker();
        assert_eq!(invoker.engine(), Path::new("/usr/local/bin/ffmpeg"));
        assert_eq!(invoker.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_clashing_tasks_are_counted_not_run() {
        let task = |source: &str| ConversionTask {
            source: source.into(),
            destination: "/out/song.mp3".into(),
            engine_args: Vec::new(),
        };
        let outcome = Converter::new()
            .run_tasks(vec![task("/in/song.ogg"), task("/in/song.wav")], AlwaysOk, |_| {})
            .unwrap();
        let RunOutcome::Completed(summary) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 2);
        assert!(summary
            .failures
            .iter()
            .all(|r| matches!(r.exit, ExitInfo::DestinationCollision(_))));
    }

    #[test]
    fn test_run_tasks_with_nothing_to_do() {
        let mut phases = Vec::new();
        let outcome = Converter::new()
            .run_tasks(Vec::new(), AlwaysOk, |p| phases.push(p.phase))
            .unwrap();
        assert_eq!(outcome, RunOutcome::Empty);
        assert_eq!(phases, vec![ProgressPhase::NothingToDo]);
    }
}
