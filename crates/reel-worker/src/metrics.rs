//! Job lifecycle metrics.

use metrics::{counter, gauge, histogram};
use reel_models::{FailureCode, JobKind};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "reel_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "reel_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "reel_jobs_failed_total";
    pub const JOBS_ACTIVE: &str = "reel_jobs_active";
    pub const JOB_DURATION_SECONDS: &str = "reel_job_duration_seconds";
    pub const JOBS_EXPIRED_TOTAL: &str = "reel_jobs_expired_total";
}

pub fn record_job_submitted(kind: JobKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(kind: JobKind, duration_secs: f64) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(kind: JobKind, code: FailureCode) {
    let labels = [
        ("kind", kind.as_str().to_string()),
        ("code", code.as_str().to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Adjust the rendering jobs gauge.
pub fn add_active_jobs(delta: f64) {
    gauge!(names::JOBS_ACTIVE).increment(delta);
}

pub fn record_jobs_expired(count: u64) {
    counter!(names::JOBS_EXPIRED_TOTAL).increment(count);
}
