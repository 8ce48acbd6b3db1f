//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while rendering or merging clips.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer exited with {}", describe_exit(.code))]
    NonZeroExit {
        code: Option<i32>,
        stderr: Option<String>,
    },

    #[error("Renderer reported success but wrote no output at {0}")]
    OutputMissing(PathBuf),

    #[error("FFmpeg not found: {0}")]
    FfmpegNotFound(String),

    #[error("FFprobe not found: {0}")]
    FfprobeNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Invalid merge request: {0}")]
    InvalidMerge(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl MediaError {
    /// Create a spawn failure error.
    pub fn spawn_failure(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailure {
            program: program.into(),
            source,
        }
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an invalid merge error.
    pub fn invalid_merge(message: impl Into<String>) -> Self {
        Self::InvalidMerge(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Captured stderr tail, if the failing process produced one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::NonZeroExit { stderr, .. }
            | MediaError::FfmpegFailed { stderr, .. }
            | MediaError::FfprobeFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }

    /// Message with the stderr tail appended, for job records.
    pub fn detailed_message(&self) -> String {
        match self.stderr().map(str::trim).filter(|s| !s.is_empty()) {
            Some(stderr) => format!("{}: {}", self, stderr),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_display() {
        let err = MediaError::NonZeroExit {
            code: Some(3),
            stderr: Some("composition not found\n".to_string()),
        };
        assert_eq!(err.to_string(), "Renderer exited with exit code 3");
        assert_eq!(
            err.detailed_message(),
            "Renderer exited with exit code 3: composition not found"
        );

        let killed = MediaError::NonZeroExit {
            code: None,
            stderr: None,
        };
        assert!(killed.to_string().contains("signal"));
        assert_eq!(killed.detailed_message(), killed.to_string());
    }
}
