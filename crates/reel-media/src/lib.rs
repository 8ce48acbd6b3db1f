#![deny(unreachable_patterns)]
//! Media execution for the Reel render service.
//!
//! This crate provides:
//! - The single-effect render executor (external renderer subprocess)
//! - Progress parsing for renderer output
//! - Cancellation support via tokio watch channels
//! - Clip merging (sequence, overlay, transition) with ffmpeg filter graphs

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod merge;
pub mod probe;
pub mod progress;
pub mod renderer;

pub use command::{check_ffmpeg, check_ffprobe, wait_for_cancel, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use merge::{build_filter_graph, ClipMerger, FfmpegMerger, MergeInput, MergeRequest};
pub use probe::get_duration;
pub use progress::{parse_percentage, ProgressTracker};
pub use renderer::{EffectRenderer, RendererConfig};
