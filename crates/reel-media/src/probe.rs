//! FFprobe clip duration.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
}

/// Get the duration in seconds of a video file with the given ffprobe binary.
pub async fn get_duration(ffprobe: &str, path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe(ffprobe)?;

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_entries",
            "format=duration:stream=codec_type",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| MediaError::spawn_failure(ffprobe, e))?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("ffprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_duration(&output.stdout)
}

fn parse_duration(stdout: &[u8]) -> MediaResult<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    if !probe.streams.iter().any(|s| s.codec_type == "video") {
        return Err(MediaError::InvalidVideo("No video stream found".to_string()));
    }

    match probe.format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()) {
        Some(duration) if duration > 0.0 => Ok(duration),
        _ => Err(MediaError::InvalidVideo("zero duration".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        let json = br#"{
            "format": {"duration": "4.966667"},
            "streams": [{"codec_type": "audio"}, {"codec_type": "video"}]
        }"#;
        assert!((parse_duration(json).unwrap() - 4.966667).abs() < 1e-6);
    }

    #[test]
    fn test_parse_duration_rejects_bad_output() {
        let no_video = br#"{"format": {"duration": "2.0"}, "streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(parse_duration(no_video), Err(MediaError::InvalidVideo(_))));

        let no_duration = br#"{"format": {}, "streams": [{"codec_type": "video"}]}"#;
        assert!(matches!(parse_duration(no_duration), Err(MediaError::InvalidVideo(_))));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = get_duration("ffprobe", "/nonexistent/clip.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
