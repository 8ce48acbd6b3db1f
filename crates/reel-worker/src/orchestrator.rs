//! Render orchestrator.
//!
//! Accepts single and composite jobs, creates their records and runs each
//! one in a supervised task. Submission returns as soon as the record
//! exists; everything after that is reflected only in the job table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use reel_media::fs_utils::remove_file_logged;
use reel_media::{wait_for_cancel, ClipMerger, EffectRenderer};
use reel_models::{
    CompositeSpec, JobId, JobInput, JobKind, JobUpdate, ParameterBuilder, ParameterBundle,
};
use tokio::sync::{watch, Semaphore};
use tracing::{error, Instrument};

use crate::composite::CompositeExecutor;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::store::JobStore;

type CancelRegistry = Arc<Mutex<HashMap<JobId, watch::Sender<bool>>>>;

/// Creates jobs and drives them to a terminal state.
#[derive(Clone)]
pub struct RenderOrchestrator {
    config: WorkerConfig,
    store: Arc<JobStore>,
    renderer: EffectRenderer,
    composite: CompositeExecutor,
    builder: Arc<dyn ParameterBuilder>,
    job_semaphore: Arc<Semaphore>,
    cancels: CancelRegistry,
}

impl RenderOrchestrator {
    pub fn new(
        config: WorkerConfig,
        store: Arc<JobStore>,
        builder: Arc<dyn ParameterBuilder>,
        merger: Arc<dyn ClipMerger>,
    ) -> Self {
        let renderer = EffectRenderer::new(config.renderer_config());
        let composite = CompositeExecutor::new(renderer.clone(), merger, Arc::clone(&builder));
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));

        Self {
            config,
            store,
            renderer,
            composite,
            builder,
            job_semaphore,
            cancels: Arc::default(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Path of a finished job's artifact.
    pub fn artifact_path(&self, artifact: &str) -> PathBuf {
        self.renderer.artifact_path(artifact)
    }

    /// Submit a single-effect job.
    pub fn submit_single(&self, bundle: ParameterBundle) -> WorkerResult<JobId> {
        self.builder.validate(&bundle)?;
        self.spawn_job(JobInput::Single { bundle })
    }

    /// Submit a composite job.
    pub fn submit_composite(&self, spec: CompositeSpec) -> WorkerResult<JobId> {
        self.composite.validate(&spec)?;
        self.spawn_job(JobInput::Composite { spec })
    }

    /// Signal cancellation of a pending or rendering job.
    ///
    /// A record is terminal exactly when its task has left the cancel
    /// registry; both change together under the registry lock.
    pub fn cancel(&self, id: &JobId) -> WorkerResult<()> {
        let cancels = self.cancels.lock().unwrap_or_else(PoisonError::into_inner);
        let record = self
            .store
            .get(id)
            .ok_or_else(|| WorkerError::NotFound(id.clone()))?;
        if record.is_terminal() {
            return Err(WorkerError::AlreadyTerminal {
                job_id: id.clone(),
                state: record.state,
            });
        }

        match cancels.get(id) {
            Some(tx) => {
                tx.send_replace(true);
                Ok(())
            }
            None => {
                error!(job_id = %id, state = %record.state, "Live job has no cancel handle");
                Err(WorkerError::internal(format!("job {} has no cancel handle", id)))
            }
        }
    }

    /// Number of jobs with a live task.
    pub fn active_jobs(&self) -> usize {
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn spawn_job(&self, input: JobInput) -> WorkerResult<JobId> {
        let kind = input.kind();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let job_id = {
            let mut cancels = self.cancels.lock().unwrap_or_else(PoisonError::into_inner);
            let record = self.store.create(input.clone())?;
            cancels.insert(record.id.clone(), cancel_tx);
            record.id
        };
        metrics::record_job_submitted(kind);

        let logger = JobLogger::new(&job_id, kind.as_str());
        let span = logger.create_span();
        let this = self.clone();
        let id = job_id.clone();

        tokio::spawn(
            async move {
                // The job runs in its own task so a panic is observed here
                let runner = this.clone();
                let run_id = id.clone();
                let run_logger = logger.clone();
                let handle = tokio::spawn(
                    async move { runner.run_job(&run_logger, &run_id, input, cancel_rx).await }
                        .in_current_span(),
                );

                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => Err(WorkerError::TaskPanicked(panic_message(e))),
                    Err(e) => Err(WorkerError::TaskPanicked(e.to_string())),
                };

                {
                    let mut cancels = this.cancels.lock().unwrap_or_else(PoisonError::into_inner);
                    this.finish(&logger, &id, kind, outcome);
                    cancels.remove(&id);
                }
            }
            .instrument(span),
        );

        Ok(job_id)
    }

    async fn run_job(
        &self,
        logger: &JobLogger,
        job_id: &JobId,
        input: JobInput,
        cancel_rx: watch::Receiver<bool>,
    ) -> WorkerResult<(String, Instant)> {
        // Jobs waiting for a slot stay pending
        let _permit = tokio::select! {
            permit = Arc::clone(&self.job_semaphore).acquire_owned() => {
                permit.map_err(|_| WorkerError::internal("job semaphore closed"))?
            }
            _ = wait_for_cancel(Some(cancel_rx.clone())) => return Err(WorkerError::Cancelled),
        };

        self.store.transition(job_id, JobUpdate::Start)?;
        let started = Instant::now();
        metrics::add_active_jobs(1.0);

        let artifact = format!("{}.mp4", job_id);
        let output = self.renderer.artifact_path(&artifact);
        let store = Arc::clone(&self.store);
        let progress_id = job_id.clone();
        let on_progress = move |fraction: f64| {
            // Absorb float error so 0.29 maps to 29, not 28
            let percent = (fraction.clamp(0.0, 1.0) * 100.0 + 1e-9).floor() as u8;
            store.update_progress(&progress_id, percent);
        };

        let timeout = self.config.job_timeout;
        let work = async {
            match &input {
                JobInput::Single { bundle } => {
                    logger.log_start(&format!("rendering effect {}", bundle.effect_id));
                    self.renderer
                        .render(bundle, &output, Some(cancel_rx), on_progress)
                        .await
                        .map(|_| ())
                        .map_err(WorkerError::from)
                }
                JobInput::Composite { spec } => {
                    logger.log_start(&format!(
                        "rendering {} effects, merge mode {}",
                        spec.len(),
                        spec.merge.mode
                    ));
                    self.composite
                        .execute(job_id, spec, &output, cancel_rx, on_progress)
                        .await
                        .map(|_| ())
                }
            }
        };

        // On timeout the dropped job future kills the renderer and removes its scratch files
        let result = tokio::time::timeout(timeout, work)
            .await
            .unwrap_or_else(|_| Err(WorkerError::Timeout(timeout.as_secs())));
        metrics::add_active_jobs(-1.0);

        if result.is_err() {
            remove_file_logged(&output).await;
        }

        result.map(|_| (artifact, started))
    }

    fn finish(
        &self,
        logger: &JobLogger,
        job_id: &JobId,
        kind: JobKind,
        outcome: WorkerResult<(String, Instant)>,
    ) {
        let update = match outcome {
            Ok((artifact, started)) => {
                let elapsed = started.elapsed().as_secs_f64();
                logger.log_completion(&format!("{} in {:.1}s", artifact, elapsed));
                metrics::record_job_completed(kind, elapsed);
                JobUpdate::Complete { artifact }
            }
            Err(e) => {
                let code = e.failure_code();
                logger.log_error(&e.record_message());
                metrics::record_job_failed(kind, code);
                JobUpdate::fail(code, e.record_message())
            }
        };

        if let Err(e) = self.store.transition(job_id, update) {
            error!(job_id = %job_id, "Failed to record job outcome: {}", e);
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
