//! Render parameter bundles.

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest render accepted, in seconds.
pub const MAX_DURATION_SECS: f64 = 600.0;
/// Frame rate bounds.
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 120;
/// Largest edge accepted for a render target.
pub const MAX_DIMENSION: u32 = 4096;

/// Errors raised while turning raw request fields into a bundle.
///
/// These never create a job and are never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    #[error("Missing required field '{field}' for effect '{effect_id}'")]
    MissingField { effect_id: String, field: String },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Composite job requires at least one effect")]
    EmptyComposite,

    #[error("Invalid merge configuration: {0}")]
    InvalidMerge(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ValidationError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_field(effect_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            effect_id: effect_id.into(),
            field: field.into(),
        }
    }

    pub fn invalid_merge(msg: impl Into<String>) -> Self {
        Self::InvalidMerge(msg.into())
    }
}

/// Output frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check the size is usable for yuv420p output.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.width == 0 || self.height == 0 {
            return Err(ValidationError::invalid_field(
                "resolution",
                "width/height must be non-zero",
            ));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(ValidationError::invalid_field(
                "resolution",
                format!("width/height must be at most {}", MAX_DIMENSION),
            ));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ValidationError::invalid_field(
                "resolution",
                "width/height must be even",
            ));
        }
        Ok(())
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1080, 1920)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Validated, effect-specific render configuration.
///
/// Produced by a [`crate::ParameterBuilder`]; executors read the render
/// target fields and pass `props` through to the renderer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParameterBundle {
    /// Catalog ID of the effect
    pub effect_id: String,
    /// Composition rendered by the external renderer
    pub composition_id: String,
    /// Entry module of the effect project, relative to `working_dir`
    pub entry_module: String,
    /// Directory the renderer is launched from
    pub working_dir: PathBuf,
    pub fps: u32,
    pub duration_secs: f64,
    pub resolution: Resolution,
    /// Effect-specific properties, serialized for the renderer
    pub props: serde_json::Value,
}

impl ParameterBundle {
    /// Total frames to render (at least one).
    pub fn total_frames(&self) -> u64 {
        ((self.duration_secs * self.fps as f64).round() as u64).max(1)
    }

    /// Inclusive frame range handed to the renderer.
    pub fn frame_range(&self) -> (u64, u64) {
        (0, self.total_frames() - 1)
    }

    /// Exact duration of the rendered frames.
    pub fn rendered_duration_secs(&self) -> f64 {
        self.total_frames() as f64 / self.fps as f64
    }

    /// Structural checks every bundle must pass before rendering.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.composition_id.trim().is_empty() {
            return Err(ValidationError::invalid_field(
                "composition_id",
                "must not be empty",
            ));
        }
        if self.entry_module.trim().is_empty() {
            return Err(ValidationError::invalid_field(
                "entry_module",
                "must not be empty",
            ));
        }
        if !(MIN_FPS..=MAX_FPS).contains(&self.fps) {
            return Err(ValidationError::invalid_field(
                "fps",
                format!("must be between {} and {}", MIN_FPS, MAX_FPS),
            ));
        }
        if !self.duration_secs.is_finite()
            || self.duration_secs <= 0.0
            || self.duration_secs > MAX_DURATION_SECS
        {
            return Err(ValidationError::invalid_field(
                "duration",
                format!("must be within (0, {}] seconds", MAX_DURATION_SECS),
            ));
        }
        if !self.props.is_object() {
            return Err(ValidationError::invalid_field("props", "must be a JSON object"));
        }
        self.resolution.validate()
    }
}

#[cfg(test)]
pub(crate) fn test_bundle(effect_id: &str, duration_secs: f64) -> ParameterBundle {
    ParameterBundle {
        effect_id: effect_id.to_string(),
        composition_id: "Main".to_string(),
        entry_module: "src/index.ts".to_string(),
        working_dir: PathBuf::from("/srv/effects").join(effect_id),
        fps: 30,
        duration_secs,
        resolution: Resolution::new(1080, 1920),
        props: serde_json::json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_range() {
        let bundle = test_bundle("glow", 3.0);
        assert_eq!(bundle.total_frames(), 90);
        assert_eq!(bundle.frame_range(), (0, 89));
        assert!((bundle.rendered_duration_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_tiny_duration_still_renders_one_frame() {
        let bundle = test_bundle("glow", 0.001);
        assert_eq!(bundle.total_frames(), 1);
        assert_eq!(bundle.frame_range(), (0, 0));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut bundle = test_bundle("glow", 3.0);
        assert!(bundle.validate().is_ok());

        bundle.fps = 0;
        assert!(matches!(
            bundle.validate(),
            Err(ValidationError::InvalidField { ref field, .. }) if field == "fps"
        ));

        bundle.fps = 30;
        bundle.duration_secs = f64::NAN;
        assert!(bundle.validate().is_err());

        bundle.duration_secs = 2.0;
        bundle.resolution = Resolution::new(1081, 1920);
        assert!(bundle.validate().is_err());

        bundle.resolution = Resolution::default();
        bundle.props = serde_json::json!([1, 2]);
        assert!(bundle.validate().is_err());
    }
}
