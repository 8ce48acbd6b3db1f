//! Job records and the render job state machine.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::composite::CompositeSpec;
use crate::effect::ParameterBundle;

/// Default prefix for generated job IDs.
pub const DEFAULT_JOB_ID_PREFIX: &str = "render";

/// Progress is capped here until a job actually completes.
pub const MAX_RENDERING_PROGRESS: u8 = 99;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generates job IDs of the form `render-20261016-1760616000123456`.
///
/// The numeric suffix is a microsecond timestamp that is forced to be
/// strictly increasing, so IDs never repeat within the process and sort
/// lexicographically in creation order.
#[derive(Debug)]
pub struct JobIdGenerator {
    prefix: String,
    last_micros: AtomicI64,
}

impl Default for JobIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_ID_PREFIX)
    }
}

impl JobIdGenerator {
    /// Create a generator with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last_micros: AtomicI64::new(0),
        }
    }

    /// Issue the next ID.
    pub fn next_id(&self) -> JobId {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last_micros.load(Ordering::Relaxed);
        let issued = loop {
            let candidate = now.max(last + 1);
            match self.last_micros.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break candidate,
                Err(actual) => last = actual,
            }
        };

        let date = DateTime::<Utc>::from_timestamp_micros(issued).unwrap_or_else(Utc::now);
        JobId(format!(
            "{}-{}-{:016}",
            self.prefix,
            date.format("%Y%m%d"),
            issued
        ))
    }
}

/// Kind of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// One effect, one render
    Single,
    /// Several effect renders merged into one output
    Composite,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Single => "single",
            JobKind::Composite => "composite",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, waiting for a render slot
    #[default]
    Pending,
    /// Renderer is running
    Rendering,
    /// Output artifact is available
    Completed,
    /// Render failed, see the error field
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Rendering => "rendering",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable failure class stored alongside the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Validation,
    SpawnFailure,
    NonZeroExit,
    StepFailure,
    MergeFailure,
    Cancelled,
    Timeout,
    Internal,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Validation => "validation",
            FailureCode::SpawnFailure => "spawn_failure",
            FailureCode::NonZeroExit => "non_zero_exit",
            FailureCode::StepFailure => "step_failure",
            FailureCode::MergeFailure => "merge_failure",
            FailureCode::Cancelled => "cancelled",
            FailureCode::Timeout => "timeout",
            FailureCode::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters a job was created with. Immutable once the record exists.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobInput {
    Single { bundle: ParameterBundle },
    Composite { spec: CompositeSpec },
}

impl JobInput {
    pub fn kind(&self) -> JobKind {
        match self {
            JobInput::Single { .. } => JobKind::Single,
            JobInput::Composite { .. } => JobKind::Composite,
        }
    }
}

/// A mutation request against a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// `pending -> rendering`
    Start,
    /// Progress percentage while rendering
    Progress(u8),
    /// `rendering -> completed`
    Complete { artifact: String },
    /// `pending | rendering -> failed`
    Fail { code: FailureCode, message: String },
}

impl JobUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            JobUpdate::Start => "start",
            JobUpdate::Progress(_) => "progress",
            JobUpdate::Complete { .. } => "complete",
            JobUpdate::Fail { .. } => "fail",
        }
    }

    pub fn fail(code: FailureCode, message: impl Into<String>) -> Self {
        JobUpdate::Fail {
            code,
            message: message.into(),
        }
    }
}

/// Rejected state machine transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition '{update}' for job {job_id} in state {from}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobState,
    pub update: &'static str,
}

/// The central job entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    /// Percentage, 0-100
    pub progress: u8,
    pub input: JobInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<FailureCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending record.
    pub fn new(id: JobId, input: JobInput) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: input.kind(),
            state: JobState::Pending,
            progress: 0,
            input,
            output_artifact: None,
            error: None,
            error_code: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply an update, enforcing the state machine.
    ///
    /// Returns `Ok(false)` for accepted updates that change nothing, such as
    /// a progress value that is not above the current one.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        let invalid = |record: &JobRecord, update: &JobUpdate| TransitionError {
            job_id: record.id.clone(),
            from: record.state,
            update: update.name(),
        };

        match (self.state, &update) {
            (JobState::Pending, JobUpdate::Start) => {
                self.state = JobState::Rendering;
                self.started_at = Some(now);
            }
            (JobState::Rendering, JobUpdate::Progress(value)) => {
                let value = (*value).min(MAX_RENDERING_PROGRESS);
                if value <= self.progress {
                    return Ok(false);
                }
                self.progress = value;
            }
            (JobState::Rendering, JobUpdate::Complete { artifact }) => {
                self.state = JobState::Completed;
                self.progress = 100;
                self.output_artifact = Some(artifact.clone());
                self.completed_at = Some(now);
            }
            (JobState::Pending | JobState::Rendering, JobUpdate::Fail { code, message }) => {
                self.state = JobState::Failed;
                self.error = Some(message.clone());
                self.error_code = Some(*code);
                self.completed_at = Some(now);
            }
            _ => return Err(invalid(self, &update)),
        }

        self.updated_at = now;
        Ok(true)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
