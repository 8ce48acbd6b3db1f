//! Worker error types.

use reel_media::MediaError;
use reel_models::{FailureCode, JobId, JobState, TransitionError, ValidationError};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Render failed: {0}")]
    Render(#[from] MediaError),

    #[error("Step {step} ({effect_id}) failed: {source}")]
    StepFailure {
        step: usize,
        effect_id: String,
        #[source]
        source: MediaError,
    },

    #[error("Merge failed: {0}")]
    MergeFailed(#[source] MediaError),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id} is already {state}")]
    AlreadyTerminal { job_id: JobId, state: JobState },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Job task panicked: {0}")]
    TaskPanicked(String),

    #[error("Job id collision: {0}")]
    IdCollision(JobId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn step_failure(step: usize, effect_id: impl Into<String>, source: MediaError) -> Self {
        Self::StepFailure {
            step,
            effect_id: effect_id.into(),
            source,
        }
    }

    /// Failure code stored on the job record.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            WorkerError::Validation(_) => FailureCode::Validation,
            WorkerError::Render(media) => media_failure_code(media),
            WorkerError::StepFailure {
                source: MediaError::Cancelled,
                ..
            } => FailureCode::Cancelled,
            WorkerError::StepFailure { .. } => FailureCode::StepFailure,
            WorkerError::MergeFailed(MediaError::Cancelled) => FailureCode::Cancelled,
            WorkerError::MergeFailed(_) => FailureCode::MergeFailure,
            WorkerError::Cancelled => FailureCode::Cancelled,
            WorkerError::Timeout(_) => FailureCode::Timeout,
            WorkerError::InvalidTransition(_)
            | WorkerError::NotFound(_)
            | WorkerError::AlreadyTerminal { .. }
            | WorkerError::TaskPanicked(_)
            | WorkerError::IdCollision(_)
            | WorkerError::Internal(_) => FailureCode::Internal,
        }
    }

    /// Message stored on the job record, including any stderr tail.
    pub fn record_message(&self) -> String {
        match self {
            WorkerError::Render(media) => media.detailed_message(),
            WorkerError::StepFailure {
                step,
                effect_id,
                source,
            } => format!("Step {} ({}) failed: {}", step, effect_id, source.detailed_message()),
            WorkerError::MergeFailed(media) => format!("Merge failed: {}", media.detailed_message()),
            other => other.to_string(),
        }
    }
}

fn media_failure_code(err: &MediaError) -> FailureCode {
    match err {
        MediaError::SpawnFailure { .. } => FailureCode::SpawnFailure,
        MediaError::NonZeroExit { .. } | MediaError::OutputMissing(_) => FailureCode::NonZeroExit,
        MediaError::Cancelled => FailureCode::Cancelled,
        _ => FailureCode::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes() {
        let spawn = WorkerError::Render(MediaError::spawn_failure(
            "npx",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
        assert_eq!(spawn.failure_code(), FailureCode::SpawnFailure);

        let exit = WorkerError::Render(MediaError::NonZeroExit {
            code: Some(1),
            stderr: None,
        });
        assert_eq!(exit.failure_code(), FailureCode::NonZeroExit);

        let step = WorkerError::step_failure(1, "stars", MediaError::Cancelled);
        assert_eq!(step.failure_code(), FailureCode::Cancelled);

        let merge = WorkerError::MergeFailed(MediaError::internal("boom"));
        assert_eq!(merge.failure_code(), FailureCode::MergeFailure);

        assert_eq!(
            WorkerError::TaskPanicked("oops".into()).failure_code(),
            FailureCode::Internal
        );
    }

    #[test]
    fn test_record_message_includes_stderr() {
        let err = WorkerError::step_failure(
            0,
            "title",
            MediaError::NonZeroExit {
                code: Some(2),
                stderr: Some("Could not find composition".into()),
            },
        );
        let message = err.record_message();
        assert!(message.starts_with("Step 0 (title) failed"));
        assert!(message.contains("Could not find composition"));
    }
}
