//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reel_media::RendererConfig;

/// Render worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory for finished artifacts
    pub output_dir: PathBuf,
    /// Directory for props files and composite work directories
    pub temp_dir: PathBuf,
    /// Effect renderer program
    pub renderer_program: String,
    /// Arguments placed before the per-render arguments
    pub renderer_args: Vec<String>,
    /// Maximum concurrently rendering jobs
    pub max_concurrent_jobs: usize,
    /// Upper bound on one job's wall time
    pub job_timeout: Duration,
    /// ffmpeg binary used by the merger
    pub ffmpeg_path: String,
    /// ffprobe binary used by the merger
    pub ffprobe_path: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/tmp/reel/output"),
            temp_dir: PathBuf::from("/tmp/reel/tmp"),
            renderer_program: "npx".to_string(),
            renderer_args: vec!["remotion".to_string(), "render".to_string()],
            max_concurrent_jobs: 4,
            job_timeout: Duration::from_secs(1800), // 30 minutes
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            output_dir: std::env::var("RENDER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            temp_dir: std::env::var("RENDER_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            renderer_program: std::env::var("RENDERER_PROGRAM")
                .unwrap_or(defaults.renderer_program),
            renderer_args: std::env::var("RENDERER_ARGS")
                .map(|s| split_args(&s))
                .unwrap_or(defaults.renderer_args),
            max_concurrent_jobs: std::env::var("RENDER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: std::env::var("RENDER_JOB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
        }
    }

    /// Renderer launch settings derived from this config.
    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            program: self.renderer_program.clone(),
            base_args: self.renderer_args.clone(),
            output_dir: self.output_dir.clone(),
            temp_dir: self.temp_dir.clone(),
        }
    }
}

fn split_args(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}
