//! Error types for duckvert
//!
//! Only failures that stop a run before any task is dispatched live here.
//! A single file that fails to convert is not an error: it is reported as a
//! failed [`JobResult`](crate::JobResult) and counted in the run summary.

use std::path::PathBuf;
use thiserror::Error;

/// Systemic failure that aborts a conversion run
#[derive(Error, Debug)]
pub enum EngineError {
    /// The source root does not exist
    #[error("Source folder '{}' does not exist", .0.display())]
    SourceNotFound(PathBuf),

    /// The source root exists but is not a directory
    #[error("Source '{}' is not a folder", .0.display())]
    SourceNotDirectory(PathBuf),

    /// The source root could not be listed
    #[error("Unable to read source folder '{}': {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Reading or parsing a configuration file failed
    #[error("Invalid config file '{}': {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not be started
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// I/O errors while resolving paths
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the library
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_errors_name_the_path() {
        let err = EngineError::SourceNotFound(PathBuf::from("/music/missing"));
        assert_eq!(err.to_string(), "Source folder '/music/missing' does not exist");

        let err = EngineError::SourceNotDirectory(PathBuf::from("/music/song.flac"));
        assert!(err.to_string().contains("/music/song.flac"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
