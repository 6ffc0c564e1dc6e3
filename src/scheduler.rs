//! Bounded worker pool that fans tasks out to an [`Invoker`]

use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error};

use crate::discover::ConversionTask;
use crate::error::Result;
use crate::invoke::{ExitInfo, Invoker, JobResult};

/// Number of CPU cores reported by the OS, at least 1
pub fn available_cores() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Runs conversion tasks on a fixed number of workers
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    concurrency: usize,
}

impl Scheduler {
    /// Create a scheduler with `concurrency` workers (clamped to at least 1)
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// One worker per available CPU core
    pub fn with_available_cores() -> Self {
        Self::new(available_cores())
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start every task and return a stream of results in completion order.
    ///
    /// Each task is started exactly once. A panic inside the invoker is
    /// turned into a failed [`JobResult`] for that task.
    ///
    /// # Errors
    ///
    /// Fails if the worker pool cannot be created; no task has started then.
    pub fn run<I>(&self, tasks: Vec<ConversionTask>, invoker: Arc<I>) -> Result<ResultStream>
    where
        I: Invoker + 'static,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("duckvert-worker-{}", i))
            .build()?;

        let total = tasks.len();
        let (tx, rx) = mpsc::channel();
        debug!(tasks = total, workers = self.concurrency, "Dispatching tasks");

        let driver = thread::Builder::new()
            .name("duckvert-scheduler".into())
            .spawn(move || {
                pool.install(|| {
                    tasks.into_par_iter().for_each_with(tx, |tx, task| {
                        let result = run_guarded(invoker.as_ref(), task);
                        // The receiver may be gone if the caller stopped listening
                        let _ = tx.send(result);
                    });
                });
            })?;

        Ok(ResultStream {
            rx,
            driver: Some(driver),
            total,
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::with_available_cores()
    }
}

/// Lazily yields [`JobResult`]s as workers finish them.
///
/// The stream ends once every task has reported. Dropping it early still
/// waits for the running tasks so no engine process is orphaned.
pub struct ResultStream {
    rx: Receiver<JobResult>,
    driver: Option<JoinHandle<()>>,
    total: usize,
}

impl ResultStream {
    /// Number of tasks that were submitted
    pub fn total(&self) -> usize {
        self.total
    }

    fn join_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                error!("Scheduler thread panicked");
            }
        }
    }
}

impl Iterator for ResultStream {
    type Item = JobResult;

    fn next(&mut self) -> Option<JobResult> {
        match self.rx.recv() {
            Ok(result) => Some(result),
            Err(_) => {
                self.join_driver();
                None
            }
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.join_driver();
    }
}

fn run_guarded<I: Invoker + ?Sized>(invoker: &I, task: ConversionTask) -> JobResult {
    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| invoker.run(&task))) {
        Ok(result) => result,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            error!(source = %task.source.display(), detail = %detail, "Invoker panicked");
            JobResult::new(task, ExitInfo::Panicked(detail), started.elapsed())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn tasks(n: usize) -> Vec<ConversionTask> {
        (0..n)
            .map(|i| ConversionTask {
                source: PathBuf::from(format!("/src/{}.wav", i)),
                destination: PathBuf::from(format!("/dst/{}.mp3", i)),
                engine_args: vec![],
            })
            .collect()
    }

    /// Tracks how many calls are in flight at once
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl Gauge {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Invoker for Gauge {
        fn run(&self, task: &ConversionTask) -> JobResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.seen.lock().unwrap().push(task.source.clone());
            self.current.fetch_sub(1, Ordering::SeqCst);
            JobResult::new(task.clone(), ExitInfo::Exited(0), Duration::ZERO)
        }
    }

    struct Panicky;

    impl Invoker for Panicky {
        fn run(&self, task: &ConversionTask) -> JobResult {
            if task.source.ends_with("3.wav") {
                panic!("engine exploded");
            }
            JobResult::new(task.clone(), ExitInfo::Exited(0), Duration::ZERO)
        }
    }

    #[test]
    fn test_concurrency_is_clamped() {
        assert_eq!(Scheduler::new(0).concurrency(), 1);
        assert_eq!(Scheduler::new(6).concurrency(), 6);
        assert!(Scheduler::with_available_cores().concurrency() >= 1);
    }

    #[test]
    fn test_every_task_runs_once() {
        let gauge = Arc::new(Gauge::new());
        let stream = Scheduler::new(3).run(tasks(12), Arc::clone(&gauge)).unwrap();
        assert_eq!(stream.total(), 12);

        let results: Vec<JobResult> = stream.collect();
        assert_eq!(results.len(), 12);

        let seen = gauge.seen.lock().unwrap();
        assert_eq!(seen.len(), 12);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn test_pool_width_is_respected() {
        let gauge = Arc::new(Gauge::new());
        let results: Vec<_> = Scheduler::new(2).run(tasks(10), Arc::clone(&gauge)).unwrap().collect();
        assert_eq!(results.len(), 10);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_panic_becomes_failed_result() {
        let results: Vec<_> = Scheduler::new(4).run(tasks(6), Arc::new(Panicky)).unwrap().collect();
        assert_eq!(results.len(), 6);

        let failed: Vec<_> = results.iter().filter(|r| !r.succeeded).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].exit, ExitInfo::Panicked("engine exploded".to_string()));
        assert!(failed[0].task.source.ends_with("3.wav"));
    }

    #[test]
    fn test_empty_task_list_ends_immediately() {
        let mut stream = Scheduler::new(2).run(Vec::new(), Arc::new(Panicky)).unwrap();
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_dropping_stream_waits_for_workers() {
        let gauge = Arc::new(Gauge::new());
        let mut stream = Scheduler::new(2).run(tasks(6), Arc::clone(&gauge)).unwrap();
        let _first = stream.next();
        drop(stream);
        assert_eq!(gauge.seen.lock().unwrap().len(), 6);
    }
}
