//! Running the transcoding engine for a single task

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::discover::ConversionTask;

/// Arguments placed before the input so ffmpeg stays quiet and overwrites stale outputs
pub const GLOBAL_ARGS: &[&str] = &["-loglevel", "quiet", "-hide_banner", "-y"];

/// How often a child is polled when a timeout is set
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitInfo {
    /// The engine ran and exited with this code
    Exited(i32),
    /// The engine was killed by a signal and has no exit code
    Terminated,
    /// The engine could not be started
    SpawnFailed(String),
    /// The engine started but its exit status could not be collected
    WaitFailed(String),
    /// The destination folder could not be created
    DirectoryFailed(String),
    /// The destination is the source file itself
    WouldOverwriteSource,
    /// Another discovered file maps to the same destination, or the destination
    /// is another discovered source; holds that other source
    DestinationCollision(PathBuf),
    /// The engine ran past the configured limit and was killed
    TimedOut(Duration),
    /// The invoker panicked while handling the task
    Panicked(String),
}

impl ExitInfo {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitInfo::Exited(0))
    }
}

impl Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitInfo::Exited(code) => write!(f, "exited with {}", code),
            ExitInfo::Terminated => write!(f, "terminated by signal"),
            ExitInfo::SpawnFailed(detail) => write!(f, "could not start engine: {}", detail),
            ExitInfo::WaitFailed(detail) => write!(f, "lost track of engine: {}", detail),
            ExitInfo::DirectoryFailed(detail) => write!(f, "could not create destination folder: {}", detail),
            ExitInfo::WouldOverwriteSource => write!(f, "destination is the source file"),
            ExitInfo::DestinationCollision(other) => write!(f, "destination clashes with {}", other.display()),
            ExitInfo::TimedOut(limit) => write!(f, "timed out after {:.0?}", limit),
            ExitInfo::Panicked(detail) => write!(f, "worker panicked: {}", detail),
        }
    }
}

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub task: ConversionTask,
    pub succeeded: bool,
    pub exit: ExitInfo,
    /// Wall-clock time spent on this task
    pub elapsed: Duration,
}

impl JobResult {
    pub fn new(task: ConversionTask, exit: ExitInfo, elapsed: Duration) -> Self {
        Self {
            succeeded: exit.is_success(),
            task,
            exit,
            elapsed,
        }
    }
}

/// Something that can carry out a [`ConversionTask`].
///
/// Implementations report every failure through the returned [`JobResult`];
/// a bad file must never abort the batch.
pub trait Invoker: Send + Sync {
    fn run(&self, task: &ConversionTask) -> JobResult;
}

/// Invokes an external ffmpeg binary once per task
#[derive(Debug, Clone)]
pub struct TranscodeInvoker {
    engine: PathBuf,
    timeout: Option<Duration>,
}

impl TranscodeInvoker {
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.into(),
            timeout: None,
        }
    }

    /// Kill the engine if a single task runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Full argument list for `task`: globals, `-i <source>`, format args, destination
    pub fn command_args(&self, task: &ConversionTask) -> Vec<OsString> {
        let mut args: Vec<OsString> = GLOBAL_ARGS.iter().map(OsString::from).collect();
        args.push("-i".into());
        args.push(task.source.clone().into_os_string());
        args.extend(task.engine_args.iter().map(OsString::from));
        args.push(task.destination.clone().into_os_string());
        args
    }

    /// Probe the engine with `-version`
    pub fn engine_available(&self) -> bool {
        let mut cmd = Command::new(&self.engine);
        cmd.arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        hide_console_window(&mut cmd);
        match cmd.status() {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    fn execute(&self, task: &ConversionTask) -> ExitInfo {
        if task.overwrites_source() {
            return ExitInfo::WouldOverwriteSource;
        }

        if let Some(parent) = task.destination.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                return ExitInfo::DirectoryFailed(format!("{}: {}", parent.display(), err));
            }
        }

        let mut cmd = Command::new(&self.engine);
        cmd.args(self.command_args(task))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        hide_console_window(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return ExitInfo::SpawnFailed(format!("{}: {}", self.engine.display(), err)),
        };

        let exit = match self.timeout {
            None => match child.wait() {
                Ok(status) => exit_info(status),
                Err(err) => ExitInfo::WaitFailed(err.to_string()),
            },
            Some(limit) => wait_with_timeout(&mut child, limit),
        };

        if !exit.is_success() {
            let _ = fs::remove_file(&task.destination);
        }
        exit
    }
}

impl Invoker for TranscodeInvoker {
    fn run(&self, task: &ConversionTask) -> JobResult {
        debug!(source = %task.source.display(), destination = %task.destination.display(), "Converting");
        let started = Instant::now();
        let exit = self.execute(task);
        let result = JobResult::new(task.clone(), exit, started.elapsed());
        if !result.succeeded {
            warn!(source = %task.source.display(), reason = %result.exit, "Conversion failed");
        }
        result
    }
}

fn exit_info(status: ExitStatus) -> ExitInfo {
    match status.code() {
        Some(code) => ExitInfo::Exited(code),
        None => ExitInfo::Terminated,
    }
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> ExitInfo {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return exit_info(status),
            Ok(None) if Instant::now() >= deadline => {
                if let Err(err) = child.kill() {
                    warn!(pid = child.id(), error = %err, "Failed to kill engine");
                }
                // Reap so no zombie is left behind
                let _ = child.wait();
                return ExitInfo::TimedOut(limit);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return ExitInfo::WaitFailed(err.to_string());
            }
        }
    }
}

#[cfg(windows)]
fn hide_console_window(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(source: &Path, destination: &Path) -> ConversionTask {
        ConversionTask {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            engine_args: vec!["-codec:a".into(), "flac".into()],
        }
    }

    #[test]
    fn test_command_args_order() {
        let invoker = TranscodeInvoker::new("ffmpeg");
        let args = invoker.command_args(&task(Path::new("in.wav"), Path::new("out/in.flac")));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-loglevel", "quiet", "-hide_banner", "-y", "-i", "in.wav", "-codec:a", "flac", "out/in.flac"]
        );
    }

    #[test]
    fn test_success_only_on_zero() {
        assert!(ExitInfo::Exited(0).is_success());
        assert!(!ExitInfo::Exited(1).is_success());
        assert!(!ExitInfo::Terminated.is_success());
        assert!(!ExitInfo::TimedOut(Duration::from_secs(1)).is_success());
        assert!(!ExitInfo::WaitFailed("interrupted".into()).is_success());
        assert!(!ExitInfo::DestinationCollision(PathBuf::from("a.ogg")).is_success());
    }

    #[test]
    fn test_wait_failure_is_not_a_spawn_failure() {
        assert_eq!(
            ExitInfo::WaitFailed("interrupted".into()).to_string(),
            "lost track of engine: interrupted"
        );
        assert_ne!(
            ExitInfo::WaitFailed("x".into()).to_string(),
            ExitInfo::SpawnFailed("x".into()).to_string()
        );
    }

    #[test]
    fn test_refuses_to_overwrite_source() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("same.flac");
        fs::write(&file, b"original").unwrap();

        let result = TranscodeInvoker::new("ffmpeg").run(&task(&file, &file));
        assert!(!result.succeeded);
        assert_eq!(result.exit, ExitInfo::WouldOverwriteSource);
        assert_eq!(fs::read(&file).unwrap(), b"original");
    }

    #[test]
    fn test_missing_engine_is_a_spawn_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let invoker = TranscodeInvoker::new(tmp.path().join("no-such-engine"));
        let dest = tmp.path().join("nested/dir/out.mp3");
        let result = invoker.run(&task(&tmp.path().join("in.wav"), &dest));

        assert!(!result.succeeded);
        assert!(matches!(result.exit, ExitInfo::SpawnFailed(_)));
        // the folder is created before the engine is started
        assert!(dest.parent().unwrap().is_dir());
        assert!(!invoker.engine_available());
    }

    #[test]
    fn test_blocked_destination_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let result = TranscodeInvoker::new("ffmpeg").run(&task(&tmp.path().join("in.wav"), &blocker.join("out.mp3")));
        assert!(matches!(result.exit, ExitInfo::DirectoryFailed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_codes_from_real_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let t = task(&tmp.path().join("in.wav"), &tmp.path().join("out/in.flac"));

        let ok = TranscodeInvoker::new("true").run(&t);
        assert!(ok.succeeded);
        assert_eq!(ok.exit, ExitInfo::Exited(0));

        let failed = TranscodeInvoker::new("false").run(&t);
        assert!(!failed.succeeded);
        assert_eq!(failed.exit, ExitInfo::Exited(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("slow-engine");
        fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let limit = Duration::from_millis(200);
        let invoker = TranscodeInvoker::new(&script).with_timeout(Some(limit));
        let started = Instant::now();
        let result = invoker.run(&task(&tmp.path().join("in.wav"), &tmp.path().join("out.mp3")));

        assert_eq!(result.exit, ExitInfo::TimedOut(limit));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
