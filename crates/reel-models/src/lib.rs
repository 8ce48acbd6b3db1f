//! Shared data models for the Reel render service.
//!
//! This crate provides Serde-serializable types for:
//! - Job records, IDs and the job state machine
//! - Render parameter bundles and the parameter builder contract
//! - Composite merge configuration
//! - API request bodies

pub mod catalog;
pub mod composite;
pub mod effect;
pub mod job;
pub mod request;

// Re-export common types
pub use catalog::{CatalogError, EffectCatalog, EffectDefinition, ParameterBuilder};
pub use composite::{CompositeSpec, MergeConfig, MergeMode, TransitionKind, TransitionSpec};
pub use effect::{ParameterBundle, Resolution, ValidationError};
pub use job::{
    FailureCode, JobId, JobIdGenerator, JobInput, JobKind, JobRecord, JobState, JobUpdate,
    TransitionError,
};
pub use request::{CompositeEffectEntry, CompositeJobRequest};
