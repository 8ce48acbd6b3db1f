//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission, polling, cancellation and artifact download
//! - Request id, logging and security header middleware
//! - Prometheus metrics
//! - The expiry sweeper background service

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{ExpirySweeper, SweepSummary, SweeperConfig};
pub use state::AppState;
