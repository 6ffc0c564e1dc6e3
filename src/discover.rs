//! Source tree discovery
//!
//! Walks the source folder and turns every recognized audio file into a
//! [`ConversionTask`] whose destination mirrors the file's position under the
//! destination root.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{EngineError, Result};
use crate::format::{is_audio_file_name, FormatSpec};
use crate::invoke::{ExitInfo, JobResult};

/// Name used for the default destination when the source has no final component
const FALLBACK_DEST_NAME: &str = "duckvert-output";

/// One file's pending conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    /// Absolute path of the file to convert
    pub source: PathBuf,
    /// Absolute path the converted file is written to
    pub destination: PathBuf,
    /// Format-specific arguments passed to the engine
    pub engine_args: Vec<String>,
}

impl ConversionTask {
    /// True when converting would write over the file being read
    pub fn overwrites_source(&self) -> bool {
        self.source == self.destination
    }
}

/// Collect a conversion task for every audio file under `source_root`.
///
/// The returned list is sorted by path, so repeated calls over an unchanged
/// tree return identical tasks. An empty list means there is nothing to do.
///
/// # Errors
///
/// Fails only if the source root is missing, is not a folder or cannot be
/// listed. Unreadable entries further down are logged and skipped.
pub fn discover(source_root: &Path, dest_root: &Path, spec: &FormatSpec) -> Result<Vec<ConversionTask>> {
    let source_root = resolve_source_root(source_root)?;
    let dest_root = normalize(dest_root)?;

    // Outputs written inside the source tree must not be picked up again
    let skip_dest = dest_root != source_root && dest_root.starts_with(&source_root);

    let walker = WalkDir::new(&source_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(skip_dest && e.depth() > 0 && e.file_type().is_dir() && e.path() == dest_root));

    let mut tasks = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(EngineError::SourceUnreadable { path: source_root.clone(), source: err });
            }
            Err(err) => {
                warn!(error = %err, "Skipping unreadable entry");
                continue;
            }
        };

        if !is_regular_file(&entry) {
            continue;
        }

        let path = entry.path();
        if !is_audio_file_name(&entry.file_name().to_string_lossy()) {
            continue;
        }

        if let Some(destination) = mirrored_destination(path, &source_root, &dest_root, &spec.extension) {
            tasks.push(ConversionTask {
                source: path.to_path_buf(),
                destination,
                engine_args: spec.engine_args.clone(),
            });
        }
    }

    debug!(count = tasks.len(), source = %source_root.display(), "Discovery finished");
    Ok(tasks)
}

/// Split `tasks` into those safe to dispatch and failed results for the ones
/// whose destination clashes with another task's destination or with a
/// discovered source (`song.wav` and `song.ogg` both becoming `song.mp3`).
///
/// Every task lands on exactly one side. A task that would write over its own
/// source is kept for the invoker to refuse.
pub fn reject_collisions(tasks: Vec<ConversionTask>) -> (Vec<ConversionTask>, Vec<JobResult>) {
    let clashes: Vec<Option<PathBuf>> = {
        let sources: HashSet<&Path> = tasks.iter().map(|t| t.source.as_path()).collect();
        let mut writers: HashMap<&Path, Vec<&Path>> = HashMap::new();
        for task in tasks.iter().filter(|t| !t.overwrites_source()) {
            writers
                .entry(task.destination.as_path())
                .or_default()
                .push(task.source.as_path());
        }

        tasks
            .iter()
            .map(|task| {
                if task.overwrites_source() {
                    return None;
                }
                if sources.contains(task.destination.as_path()) {
                    return Some(task.destination.clone());
                }
                writers
                    .get(task.destination.as_path())
                    .and_then(|w| w.iter().find(|s| **s != task.source.as_path()))
                    .map(|s| s.to_path_buf())
            })
            .collect()
    };

    let mut dispatch = Vec::with_capacity(tasks.len());
    let mut rejected = Vec::new();
    for (task, clash) in tasks.into_iter().zip(clashes) {
        match clash {
            Some(other) => {
                warn!(
                    source = %task.source.display(),
                    destination = %task.destination.display(),
                    other = %other.display(),
                    "Destination collision"
                );
                rejected.push(JobResult::new(task, ExitInfo::DestinationCollision(other), Duration::ZERO));
            }
            None => dispatch.push(task),
        }
    }
    (dispatch, rejected)
}

/// `"<parent>/<source name><suffix>"`, the sibling folder used when no destination is given
pub fn default_destination(source: &Path, suffix: &str) -> Result<PathBuf> {
    let source = normalize(source)?;
    Ok(match source.file_name() {
        Some(name) => {
            let mut dest_name = name.to_os_string();
            dest_name.push(suffix);
            source.with_file_name(dest_name)
        }
        None => source.join(FALLBACK_DEST_NAME),
    })
}

/// `"<parent>/<source name>"`, used when the user picks a folder to mirror into
pub fn mirror_into(parent: &Path, source: &Path) -> Result<PathBuf> {
    let source = normalize(source)?;
    Ok(match source.file_name() {
        Some(name) => parent.join(name),
        None => parent.join(FALLBACK_DEST_NAME),
    })
}

fn resolve_source_root(source_root: &Path) -> Result<PathBuf> {
    let metadata = match fs::metadata(source_root) {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound(source_root.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_dir() {
        return Err(EngineError::SourceNotDirectory(source_root.to_path_buf()));
    }
    normalize(source_root)
}

/// Absolute form of `path` with `.` and `..` folded away lexically
fn normalize(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn is_regular_file(entry: &walkdir::DirEntry) -> bool {
    let ft = entry.file_type();
    // Links to files are converted, links to folders are not followed
    ft.is_file() || (ft.is_symlink() && entry.path().is_file())
}

fn mirrored_destination(file: &Path, source_root: &Path, dest_root: &Path, extension: &str) -> Option<PathBuf> {
    let relative_dir = file.parent()?.strip_prefix(source_root).ok()?;
    let mut file_name: OsString = file.file_stem()?.to_os_string();
    file_name.push(".");
    file_name.push(extension);
    Some(dest_root.join(relative_dir).join(file_name))
}
