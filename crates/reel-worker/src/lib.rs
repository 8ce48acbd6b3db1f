//! Render job orchestration.
//!
//! This crate provides:
//! - The in-memory job table
//! - Supervised execution of single and composite render jobs
//! - Concurrency limits, cancellation and per-job timeouts
//! - Job lifecycle logging and metrics

pub mod composite;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod store;

pub use composite::CompositeExecutor;
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use orchestrator::RenderOrchestrator;
pub use store::JobStore;
