//! Engine configuration
//!
//! Loaded from `duckvert.toml`. Every field is optional; missing fields take
//! the built-in defaults.
//!
//! ```toml
//! ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
//! workers = 4
//! task_timeout_secs = 600
//! default_format = "mp3"
//! destination_suffix = " - Duckvert"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::format::OutputFormat;
use crate::scheduler::available_cores;

/// File name looked up in the config folder and the working directory
pub const CONFIG_FILE_NAME: &str = "duckvert.toml";

const ENGINE_NAME: &str = "ffmpeg";

fn default_destination_suffix() -> String {
    " - Duckvert".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine binary; when unset a bundled ffmpeg next to the executable wins over `PATH`
    pub ffmpeg_path: Option<PathBuf>,
    /// Worker count; defaults to the number of CPU cores
    pub workers: Option<usize>,
    /// Per-task limit in seconds; no limit when unset
    pub task_timeout_secs: Option<u64>,
    /// Format used when none is given on the command line
    pub default_format: Option<OutputFormat>,
    /// Appended to the source folder name to build the default destination
    pub destination_suffix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            workers: None,
            task_timeout_secs: None,
            default_format: None,
            destination_suffix: default_destination_suffix(),
        }
    }
}

impl EngineConfig {
    /// Load configuration, trying in order:
    /// `explicit`, the user config folder, the working directory, built-in defaults.
    ///
    /// An explicit path that does not exist is an error; the other locations
    /// are skipped when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for path in Self::search_paths() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Locations searched by [`EngineConfig::load`]
    pub fn search_paths() -> Vec<PathBuf> {
        let mut tried = Vec::new();
        if let Some(mut d) = dirs::config_dir() {
            d.push("duckvert");
            d.push(CONFIG_FILE_NAME);
            tried.push(d);
        }
        tried.push(PathBuf::from(CONFIG_FILE_NAME));
        tried
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let cfg: EngineConfig = toml::from_str(&text).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(EngineError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(EngineError::InvalidConfig("task_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(available_cores).max(1)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    /// Engine binary to run: configured path, bundled copy, then `ffmpeg` from `PATH`
    pub fn resolve_engine(&self) -> PathBuf {
        if let Some(path) = &self.ffmpeg_path {
            return path.clone();
        }
        if let Some(bundled) = bundled_engine() {
            return bundled;
        }
        PathBuf::from(ENGINE_NAME)
    }
}

fn bundled_engine() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe
        .parent()?
        .join(format!("{}{}", ENGINE_NAME, std::env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}
