//! Single-effect render executor.
//!
//! Drives one run of the external effect renderer: props are written to a
//! scoped temp file, the renderer is spawned in the effect's working
//! directory, stdout percentages are forwarded as monotonic progress and the
//! stderr tail is kept for diagnostics.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use reel_models::ParameterBundle;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::command::{collect_tail, wait_for_exit, LossyLines};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_dir, ensure_parent_dir};
use crate::progress::ProgressTracker;

/// Renderer launch configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Program to execute
    pub program: String,
    /// Arguments placed before the per-render arguments
    pub base_args: Vec<String>,
    /// Directory for finished artifacts
    pub output_dir: PathBuf,
    /// Directory for props files and composite work directories
    pub temp_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            base_args: vec!["remotion".to_string(), "render".to_string()],
            output_dir: PathBuf::from("/tmp/reel/output"),
            temp_dir: PathBuf::from("/tmp/reel/tmp"),
        }
    }
}

/// Serialized props for one invocation; the file is removed on drop.
struct PropsFile {
    file: NamedTempFile,
}

impl PropsFile {
    fn write(temp_dir: &Path, props: &serde_json::Value) -> MediaResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("props-")
            .suffix(".json")
            .tempfile_in(temp_dir)?;
        serde_json::to_writer(&mut file, props)?;
        file.flush()?;
        Ok(Self { file })
    }

    fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file, logging a failure instead of returning it.
    fn close(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!("Failed to remove props file {}: {}", path.display(), e);
        }
    }
}

/// Runs the external effect renderer.
#[derive(Debug, Clone)]
pub struct EffectRenderer {
    config: RendererConfig,
}

impl EffectRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Path of a named artifact in the output directory.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    /// Build the renderer argument list for one invocation.
    pub fn build_args(&self, bundle: &ParameterBundle, output: &Path, props: &Path) -> Vec<String> {
        let (first, last) = bundle.frame_range();
        let mut args = self.config.base_args.clone();
        args.push(bundle.entry_module.clone());
        args.push(bundle.composition_id.clone());
        args.push(output.to_string_lossy().to_string());
        args.push(format!("--props={}", props.display()));
        args.push(format!("--frames={}-{}", first, last));
        args
    }

    /// Render `bundle` into `output`.
    ///
    /// `on_progress` receives strictly increasing fractions and a final `1.0`
    /// on success. The props file is gone when this returns, and the child is
    /// killed if the returned future is dropped.
    pub async fn render<F>(
        &self,
        bundle: &ParameterBundle,
        output: &Path,
        cancel: Option<watch::Receiver<bool>>,
        on_progress: F,
    ) -> MediaResult<PathBuf>
    where
        F: Fn(f64) + Send + 'static,
    {
        ensure_parent_dir(output).await?;
        ensure_dir(&self.config.temp_dir).await?;

        let props = PropsFile::write(&self.config.temp_dir, &bundle.props)?;
        let result = self
            .run_renderer(bundle, output, props.path(), cancel, on_progress)
            .await;
        props.close();

        result
    }

    async fn run_renderer<F>(
        &self,
        bundle: &ParameterBundle,
        output: &Path,
        props_path: &Path,
        cancel: Option<watch::Receiver<bool>>,
        on_progress: F,
    ) -> MediaResult<PathBuf>
    where
        F: Fn(f64) + Send + 'static,
    {
        let args = self.build_args(bundle, output, props_path);
        debug!(
            effect_id = %bundle.effect_id,
            "Running renderer: {} {}",
            self.config.program,
            args.join(" ")
        );

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .current_dir(&bundle.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::spawn_failure(&self.config.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("renderer stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("renderer stderr not captured"))?;

        let progress_handle = tokio::spawn(async move {
            let mut tracker = ProgressTracker::default();
            let mut lines = LossyLines::new(stdout);
            while let Some(line) = lines.next_line().await {
                if let Some(fraction) = tracker.observe_line(&line) {
                    on_progress(fraction);
                }
            }
            on_progress
        });
        let stderr_handle = tokio::spawn(collect_tail(stderr));

        let Some(status) = wait_for_exit(&mut child, cancel).await else {
            // Grandchildren may still hold the pipes open
            progress_handle.abort();
            stderr_handle.abort();
            info!(effect_id = %bundle.effect_id, "Render cancelled, renderer killed");
            return Err(MediaError::Cancelled);
        };
        let status = status?;
        let on_progress = progress_handle.await.ok();
        let stderr_tail = stderr_handle.await.ok().flatten();

        if !status.success() {
            return Err(MediaError::NonZeroExit {
                code: status.code(),
                stderr: stderr_tail,
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(MediaError::OutputMissing(output.to_path_buf()));
        }

        if let Some(on_progress) = on_progress {
            on_progress(1.0);
        }
        Ok(output.to_path_buf())
    }
}
