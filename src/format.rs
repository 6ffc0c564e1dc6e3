//! Output format catalog and the set of source extensions duckvert will pick up.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// File extensions (lower-case, without the dot) recognized as convertible sources
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "flac", "aac", "aiff", "m4a", "ogg", "opus", "raw", "wav", "wma", "webm",
];

/// Returns true if the file name ends with one of [`AUDIO_EXTENSIONS`], ignoring case.
///
/// Only the suffix counts, so `mixwav` and `.flac` both match.
pub fn is_audio_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Target format of a conversion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// MP3 via libmp3lame (VBR quality 3), ID3v2.3 tags, cover art kept
    Mp3,
    /// Apple Lossless in an .m4a container, cover art kept as attached picture
    Alac,
    /// FLAC
    Flac,
}

/// What the engine needs to know about a format: file extension and ffmpeg arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    /// Output extension, lower-case and without the dot
    pub extension: String,
    /// Arguments placed between the input and output paths
    pub engine_args: Vec<String>,
}

impl OutputFormat {
    /// Every format, in the order they are offered to the user
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Mp3, OutputFormat::Alac, OutputFormat::Flac];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Alac => "m4a",
            OutputFormat::Flac => "flac",
        }
    }

    pub fn parameters(&self) -> Vec<String> {
        let args: &[&str] = match self {
            OutputFormat::Mp3 => &[
                "-codec:a", "libmp3lame", "-q:a", "3",
                "-map_metadata", "0",
                "-id3v2_version", "3",
                "-c:v", "copy",
                "-map", "0:a",
                "-map", "0:v?",
            ],
            OutputFormat::Alac => &[
                "-codec:a", "alac",
                "-map_metadata", "0",
                "-c:v", "copy",
                "-disposition:v", "attached_pic",
                "-map", "0:a",
                "-map", "0:v?",
            ],
            OutputFormat::Flac => &[
                "-codec:a", "flac",
                "-map", "0:a",
                "-map", "0:v?",
            ],
        };
        args.iter().map(|s| s.to_string()).collect()
    }

    /// Build the [`FormatSpec`] consumed by task discovery
    pub fn spec(&self) -> FormatSpec {
        FormatSpec {
            extension: self.extension().to_string(),
            engine_args: self.parameters(),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Mp3 => write!(f, "MP3"),
            OutputFormat::Alac => write!(f, "ALAC"),
            OutputFormat::Flac => write!(f, "FLAC"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "alac" => Ok(OutputFormat::Alac),
            "flac" => Ok(OutputFormat::Flac),
            other => Err(format!("unsupported output format '{}' (expected mp3, alac or flac)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_ignores_case() {
        assert_eq!("MP3".parse::<OutputFormat>().unwrap(), OutputFormat::Mp3);
        assert_eq!("alac".parse::<OutputFormat>().unwrap(), OutputFormat::Alac);
        assert_eq!(" Flac ".parse::<OutputFormat>().unwrap(), OutputFormat::Flac);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = "ogg".parse::<OutputFormat>().unwrap_err();
        assert!(err.contains("ogg"));
    }

    #[test]
    fn test_extensions_are_lowercase_and_non_empty() {
        for format in OutputFormat::ALL {
            let spec = format.spec();
            assert!(!spec.extension.is_empty());
            assert_eq!(spec.extension, spec.extension.to_lowercase());
            assert!(!spec.engine_args.is_empty());
        }
    }

    #[test]
    fn test_alac_lands_in_m4a() {
        assert_eq!(OutputFormat::Alac.extension(), "m4a");
        let args = OutputFormat::Alac.parameters();
        assert_eq!(&args[..2], &["-codec:a".to_string(), "alac".to_string()]);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", OutputFormat::Mp3), "MP3");
        assert_eq!(format!("{}", OutputFormat::Alac), "ALAC");
        assert_eq!(format!("{}", OutputFormat::Flac), "FLAC");
    }

    #[test]
    fn test_audio_file_names() {
        assert!(is_audio_file_name("song.wav"));
        assert!(is_audio_file_name("SONG.WAV"));
        assert!(is_audio_file_name("live.Opus"));
        assert!(is_audio_file_name("mixwav"));
        assert!(is_audio_file_name(".flac"));
        assert!(!is_audio_file_name("song.mp3"));
        assert!(!is_audio_file_name("notes.txt"));
        assert!(!is_audio_file_name("wav.bak"));
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&OutputFormat::Alac).unwrap();
        assert_eq!(json, "\"alac\"");
        let back: OutputFormat = serde_json::from_str("\"flac\"").unwrap();
        assert_eq!(back, OutputFormat::Flac);
    }
}
