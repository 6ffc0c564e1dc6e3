//! Progress reporting and run summaries

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::invoke::JobResult;

/// Represents the current phase of a conversion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressPhase {
    /// Walking the source folder for audio files
    Scanning,
    /// Tasks are being converted
    Converting,
    /// Every task has reported
    Complete,
    /// The source folder holds no convertible files
    NothingToDo,
}

/// Progress information for a conversion run
///
/// This struct carries everything a front end needs to render a progress
/// bar and a status line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Current phase of the run
    pub phase: ProgressPhase,
    /// Number of tasks that have reported so far
    pub completed: usize,
    /// Total number of tasks (0 while scanning)
    pub total: usize,
    /// How many of the completed tasks failed
    pub failed: usize,
    /// `completed / total`, between 0.0 and 1.0
    pub fraction: f64,
    /// Human-readable status line
    pub message: String,
}

impl Progress {
    pub fn scanning() -> Self {
        Self {
            phase: ProgressPhase::Scanning,
            completed: 0,
            total: 0,
            failed: 0,
            fraction: 0.0,
            message: "Scanning files...".to_string(),
        }
    }

    pub fn nothing_to_do() -> Self {
        Self {
            phase: ProgressPhase::NothingToDo,
            completed: 0,
            total: 0,
            failed: 0,
            fraction: 0.0,
            message: "No files found".to_string(),
        }
    }

    pub fn converting(completed: usize, total: usize, failed: usize) -> Self {
        let fraction = if total > 0 {
            completed as f64 / total as f64
        } else {
            0.0
        };
        Self {
            phase: ProgressPhase::Converting,
            completed,
            total,
            failed,
            fraction,
            message: format!("Converting: {}/{}", completed, total),
        }
    }

    pub fn complete(summary: &RunSummary) -> Self {
        Self {
            phase: ProgressPhase::Complete,
            completed: summary.total,
            total: summary.total,
            failed: summary.failed,
            fraction: 1.0,
            message: format!("Completed in {:.2}s!", summary.elapsed.as_secs_f64()),
        }
    }

    /// Percentage complete (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        self.fraction * 100.0
    }
}

/// Final tally of a conversion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    /// Results of the tasks that failed, in the order they finished
    pub failures: Vec<JobResult>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// What a call to the engine ended with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Discovery found nothing to convert; no task was dispatched
    Empty,
    /// Every task ran and reported
    Completed(RunSummary),
}

/// Counts results as they stream in.
///
/// Owned by the thread draining the result stream; workers never see it.
#[derive(Debug)]
pub struct ProgressAggregator {
    total: usize,
    completed: usize,
    failures: Vec<JobResult>,
    started: Instant,
}

impl ProgressAggregator {
    /// Start counting towards `total` tasks; the run's clock starts now
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failures: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Progress before any result has arrived
    pub fn initial(&self) -> Progress {
        Progress::converting(0, self.total, 0)
    }

    /// Record one finished task and return the updated progress
    pub fn record(&mut self, result: JobResult) -> Progress {
        self.completed += 1;
        if !result.succeeded {
            self.failures.push(result);
        }
        Progress::converting(self.completed, self.total, self.failures.len())
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Stop the clock and build the summary
    pub fn finish(self) -> RunSummary {
        let failed = self.failures.len();
        RunSummary {
            total: self.total,
            succeeded: self.completed - failed,
            failed,
            elapsed: self.started.elapsed(),
            failures: self.failures,
        }
    }
}
