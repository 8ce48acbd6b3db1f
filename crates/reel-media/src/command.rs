//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Lines of stderr kept for failure diagnostics.
pub(crate) const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands with one or more inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    output_args: Vec<String>,
}

impl FfmpegCommand {
    /// Create a command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    /// Add an input file (`-i`).
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Add output arguments.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, label: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(label)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(format)
    }

    /// Set output frame rate.
    pub fn frame_rate(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    /// Drop audio from the output.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-v".to_string(),
            "error".to_string(),
        ];

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with cancellation.
pub struct FfmpegRunner {
    ffmpeg: String,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    /// Create a runner for the given ffmpeg binary (name or path).
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            cancel_rx: None,
        }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: Option<watch::Receiver<bool>>) -> Self {
        self.cancel_rx = cancel_rx;
        self
    }

    /// Run an FFmpeg command, killing it if the cancel flag is set.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        which::which(&self.ffmpeg).map_err(|_| MediaError::FfmpegNotFound(self.ffmpeg.clone()))?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.ffmpeg, args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::spawn_failure(&self.ffmpeg, e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stderr not captured"))?;
        let stderr_handle = tokio::spawn(collect_tail(stderr));

        match wait_for_exit(&mut child, self.cancel_rx.clone()).await {
            Some(status) => {
                let status = status?;
                let stderr_tail = stderr_handle.await.ok().flatten();
                if status.success() {
                    Ok(())
                } else {
                    Err(MediaError::ffmpeg_failed(
                        "FFmpeg exited with non-zero status",
                        stderr_tail,
                        status.code(),
                    ))
                }
            }
            None => {
                stderr_handle.abort();
                info!("FFmpeg cancelled, process killed");
                Err(MediaError::Cancelled)
            }
        }
    }
}

/// Wait for `child` to exit; `None` means it was killed after cancellation.
pub(crate) async fn wait_for_exit(
    child: &mut Child,
    cancel_rx: Option<watch::Receiver<bool>>,
) -> Option<std::io::Result<ExitStatus>> {
    tokio::select! {
        status = child.wait() => Some(status),
        _ = wait_for_cancel(cancel_rx) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill child process: {}", e);
            }
            None
        }
    }
}

/// Resolves once the cancel flag is set. Never resolves without a receiver
/// or after the sender is dropped.
pub async fn wait_for_cancel(cancel_rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel_rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Line reader over child output.
///
/// Invalid UTF-8 is replaced rather than ending the stream, so a child
/// never sees its pipe closed early.
pub(crate) struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line without its terminator, or `None` at EOF.
    pub(crate) async fn next_line(&mut self) -> Option<String> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => None,
            Ok(_) => {
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(String::from_utf8_lossy(&self.buf).into_owned())
            }
            Err(e) => {
                warn!("Stopped reading child output: {}", e);
                None
            }
        }
    }
}

pub(crate) fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

pub(crate) fn join_tail(tail: VecDeque<String>) -> Option<String> {
    if tail.is_empty() {
        None
    } else {
        Some(Vec::from(tail).join("\n"))
    }
}

/// Collect the last lines of a child's output stream.
pub(crate) async fn collect_tail<R>(reader: R) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = LossyLines::new(reader);
    while let Some(line) = lines.next_line().await {
        push_tail(&mut tail, line);
    }
    join_tail(tail)
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg(ffmpeg: &str) -> MediaResult<PathBuf> {
    which::which(ffmpeg).map_err(|_| MediaError::FfmpegNotFound(ffmpeg.to_string()))
}

/// Check if FFprobe is available.
pub fn check_ffprobe(ffprobe: &str) -> MediaResult<PathBuf> {
    which::which(ffprobe).map_err(|_| MediaError::FfprobeNotFound(ffprobe.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("a.mp4")
            .input("b.mp4")
            .filter_complex("[0:v][1:v]concat=n=2:v=1:a=0[vout]")
            .map("[vout]")
            .no_audio()
            .video_codec("libx264")
            .crf(20);

        let args = cmd.build_args();
        assert_eq!(&args[..5], &["-y", "-hide_banner", "-v", "error", "-i"]);
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"[vout]".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let mut tail = VecDeque::new();
        for i in 0..(STDERR_TAIL_LINES + 5) {
            push_tail(&mut tail, format!("line {}", i));
        }
        let joined = join_tail(tail).unwrap();
        assert!(joined.starts_with("line 5"));
        assert!(joined.ends_with(&format!("line {}", STDERR_TAIL_LINES + 4)));
        assert!(join_tail(VecDeque::new()).is_none());
    }

    #[tokio::test]
    async fn test_tail_survives_invalid_utf8() {
        let output: &[u8] = b"first\r\n\xff\xfe broken\nlast line";
        let tail = collect_tail(output).await.unwrap();
        assert_eq!(tail, "first\n\u{fffd}\u{fffd} broken\nlast line");
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_flag_set() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_cancel(Some(rx)));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_pending_after_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let result = tokio::time::timeout(Duration::from_millis(50), wait_for_cancel(Some(rx))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_binary() {
        let runner = FfmpegRunner::new("definitely-not-ffmpeg-binary");
        let cmd = FfmpegCommand::new("out.mp4").input("in.mp4");
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }
}
