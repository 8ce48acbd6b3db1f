//! In-memory job table.
//!
//! The map is guarded by a read-write lock and every record by its own
//! mutex, so progress updates for one job never contend with reads of
//! another. All mutations go through [`JobRecord::apply`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use reel_models::{JobId, JobIdGenerator, JobInput, JobRecord, JobState, JobUpdate};
use tracing::{debug, error};

use crate::error::{WorkerError, WorkerResult};

type RecordHandle = Arc<Mutex<JobRecord>>;

/// Thread-safe job table keyed by job id.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, RecordHandle>>,
    ids: JobIdGenerator,
}

fn lock(handle: &RecordHandle) -> MutexGuard<'_, JobRecord> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom id generator (prefix).
    pub fn with_generator(ids: JobIdGenerator) -> Self {
        Self {
            jobs: RwLock::default(),
            ids,
        }
    }

    /// Create a pending record for `input` under a fresh id.
    pub fn create(&self, input: JobInput) -> WorkerResult<JobRecord> {
        let record = JobRecord::new(self.ids.next_id(), input);
        self.insert(record.clone())?;
        Ok(record)
    }

    /// Insert a record; an existing id is never overwritten.
    pub fn insert(&self, record: JobRecord) -> WorkerResult<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&record.id) {
            error!(job_id = %record.id, "Job id collision, refusing to overwrite record");
            return Err(WorkerError::IdCollision(record.id));
        }
        jobs.insert(record.id.clone(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    fn handle(&self, id: &JobId) -> Option<RecordHandle> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Snapshot of one record.
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.handle(id).map(|handle| lock(&handle).clone())
    }

    /// Apply a state machine update.
    ///
    /// Returns whether the record changed. A rejected transition is a bug in
    /// the caller and is logged at error level.
    pub fn transition(&self, id: &JobId, update: JobUpdate) -> WorkerResult<bool> {
        let handle = self
            .handle(id)
            .ok_or_else(|| WorkerError::NotFound(id.clone()))?;
        let mut record = lock(&handle);
        record.apply(update, Utc::now()).map_err(|e| {
            error!(job_id = %id, state = %e.from, update = e.update, "Invalid job transition");
            WorkerError::from(e)
        })
    }

    /// Record progress for a rendering job.
    ///
    /// Progress arriving after the job left `rendering` (a reader task that
    /// outlived a cancelled child) is dropped.
    pub fn update_progress(&self, id: &JobId, percent: u8) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        let mut record = lock(&handle);
        if record.state != JobState::Rendering {
            debug!(job_id = %id, state = %record.state, "Dropping late progress update");
            return false;
        }
        record
            .apply(JobUpdate::Progress(percent), Utc::now())
            .unwrap_or(false)
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let handles: Vec<RecordHandle> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut records: Vec<JobRecord> = handles.iter().map(|h| lock(h).clone()).collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records
    }

    /// Remove a record.
    pub fn remove(&self, id: &JobId) -> Option<JobRecord> {
        let handle = self
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)?;
        let record = lock(&handle).clone();
        Some(record)
    }

    /// Completed records whose completion is older than `cutoff`.
    pub fn expired(&self, cutoff: DateTime<Utc>) -> Vec<JobRecord> {
        self.list()
            .into_iter()
            .filter(|r| r.state == JobState::Completed)
            .filter(|r| r.completed_at.is_some_and(|at| at < cutoff))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
