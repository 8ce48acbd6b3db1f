//! Composite render executor.
//!
//! Renders each step of a [`CompositeSpec`] in order into a per-job work
//! directory, then hands the produced clips to a [`ClipMerger`]. The work
//! directory is removed on every exit path, including a dropped future.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reel_media::fs_utils::{
    ensure_dir, ensure_parent_dir, move_file, remove_dir_logged, remove_file_logged,
};
use reel_media::{ClipMerger, EffectRenderer, MediaError, MergeInput, MergeRequest};
use reel_models::{CompositeSpec, JobId, ParameterBuilder};
use tokio::sync::watch;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Scratch directory for one composite job.
struct WorkDir {
    path: PathBuf,
    armed: bool,
}

impl WorkDir {
    async fn create(path: PathBuf) -> WorkerResult<Self> {
        ensure_dir(&path).await?;
        Ok(Self { path, armed: true })
    }

    async fn cleanup(mut self) {
        self.armed = false;
        remove_dir_logged(&self.path).await;
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Dropped mid-render (timeout or panic); async cleanup is not possible here
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove work directory {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Executes composite jobs.
#[derive(Clone)]
pub struct CompositeExecutor {
    renderer: EffectRenderer,
    merger: Arc<dyn ClipMerger>,
    builder: Arc<dyn ParameterBuilder>,
}

impl CompositeExecutor {
    pub fn new(
        renderer: EffectRenderer,
        merger: Arc<dyn ClipMerger>,
        builder: Arc<dyn ParameterBuilder>,
    ) -> Self {
        Self {
            renderer,
            merger,
            builder,
        }
    }

    /// Work directory for `job_id`.
    pub fn work_dir(&self, job_id: &JobId) -> PathBuf {
        self.renderer.config().temp_dir.join(job_id.as_str())
    }

    /// Check the merge config and re-validate every bundle with the parameter builder.
    pub fn validate(&self, spec: &CompositeSpec) -> WorkerResult<()> {
        spec.validate()?;
        for bundle in &spec.steps {
            self.builder.validate(bundle)?;
        }
        Ok(())
    }

    /// Render and merge `spec` into `output`.
    ///
    /// `on_progress` receives `(completed_steps + step_fraction) / N`.
    pub async fn execute<F>(
        &self,
        job_id: &JobId,
        spec: &CompositeSpec,
        output: &Path,
        cancel: watch::Receiver<bool>,
        on_progress: F,
    ) -> WorkerResult<PathBuf>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.validate(spec)?;

        let logger = JobLogger::new(job_id, "composite");
        ensure_parent_dir(output).await?;
        let work_dir = WorkDir::create(self.work_dir(job_id)).await?;

        let result = self
            .render_and_merge(&logger, spec, &work_dir.path, output, cancel, Arc::new(on_progress))
            .await;
        work_dir.cleanup().await;

        if result.is_err() {
            // A failed merge may leave a partial artifact behind
            remove_file_logged(output).await;
        }
        result
    }

    async fn render_and_merge(
        &self,
        logger: &JobLogger,
        spec: &CompositeSpec,
        work_dir: &Path,
        output: &Path,
        cancel: watch::Receiver<bool>,
        on_progress: Arc<dyn Fn(f64) + Send + Sync>,
    ) -> WorkerResult<PathBuf> {
        let total = spec.len() as f64;
        let mut inputs = Vec::with_capacity(spec.len());

        for (step, bundle) in spec.steps.iter().enumerate() {
            if *cancel.borrow() {
                return Err(WorkerError::Cancelled);
            }
            logger.log_step(step, &bundle.effect_id, "rendering");

            let step_output = work_dir.join(format!("step-{}.mp4", step));
            let progress = Arc::clone(&on_progress);
            let path = self
                .renderer
                .render(bundle, &step_output, Some(cancel.clone()), move |fraction| {
                    progress((step as f64 + fraction) / total)
                })
                .await
                .map_err(|e| WorkerError::step_failure(step, &bundle.effect_id, e))?;

            inputs.push(MergeInput {
                path,
                nominal_duration_secs: bundle.rendered_duration_secs(),
            });
        }

        let single_matches_target = spec.steps.len() == 1
            && spec.steps[0].resolution == spec.merge.resolution
            && spec.steps[0].fps == spec.merge.fps;

        if single_matches_target {
            move_file(&inputs[0].path, output)
                .await
                .map_err(WorkerError::MergeFailed)?;
        } else {
            logger.log_step(spec.len(), "merge", spec.merge.mode.as_str());
            let request = MergeRequest {
                inputs,
                output: output.to_path_buf(),
                config: spec.merge.clone(),
            };
            self.merger
                .merge(&request, Some(cancel))
                .await
                .map_err(|e| match e {
                    MediaError::Cancelled => WorkerError::Cancelled,
                    other => WorkerError::MergeFailed(other),
                })?;
        }

        on_progress(1.0);
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_work_dir_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("render-1");

        let work_dir = WorkDir::create(path.clone()).await.unwrap();
        std::fs::write(path.join("step-0.mp4"), b"x").unwrap();
        drop(work_dir);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_work_dir_cleanup() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("render-2");

        let work_dir = WorkDir::create(path.clone()).await.unwrap();
        work_dir.cleanup().await;
        assert!(!path.exists());
    }
}
