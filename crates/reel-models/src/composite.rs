//! Composite job configuration.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::effect::{ParameterBundle, Resolution, ValidationError, MAX_FPS, MIN_FPS};

/// How rendered clips are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Clips end to end, in list order
    #[default]
    Sequence,
    /// Clips stacked, later entries on top
    Overlay,
    /// Clips end to end with overlapping transitions
    Transition,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Sequence => "sequence",
            MergeMode::Overlay => "overlay",
            MergeMode::Transition => "transition",
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition effect between adjacent clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    #[default]
    #[serde(alias = "crossfade", alias = "cross_fade")]
    Fade,
    FadeBlack,
    Dissolve,
    WipeLeft,
    WipeRight,
    SlideLeft,
    SlideRight,
    CircleOpen,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Fade => "fade",
            TransitionKind::FadeBlack => "fade_black",
            TransitionKind::Dissolve => "dissolve",
            TransitionKind::WipeLeft => "wipe_left",
            TransitionKind::WipeRight => "wipe_right",
            TransitionKind::SlideLeft => "slide_left",
            TransitionKind::SlideRight => "slide_right",
            TransitionKind::CircleOpen => "circle_open",
        }
    }
}

/// Transition settings for [`MergeMode::Transition`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionSpec {
    #[serde(default)]
    pub kind: TransitionKind,
    pub duration_secs: f64,
}

/// Merge stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergeConfig {
    pub mode: MergeMode,
    pub resolution: Resolution,
    pub fps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionSpec>,
}

/// Ordered render steps plus how to merge them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositeSpec {
    pub steps: Vec<ParameterBundle>,
    pub merge: MergeConfig,
}

impl CompositeSpec {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check step count and merge settings against the steps.
    ///
    /// Per-effect validation of each step is the parameter builder's job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyComposite);
        }

        self.merge.resolution.validate()?;
        if !(MIN_FPS..=MAX_FPS).contains(&self.merge.fps) {
            return Err(ValidationError::invalid_field(
                "fps",
                format!("must be between {} and {}", MIN_FPS, MAX_FPS),
            ));
        }

        match (self.merge.mode, &self.merge.transition) {
            (MergeMode::Transition, None) => Err(ValidationError::invalid_merge(
                "transition mode requires transition settings",
            )),
            (MergeMode::Transition, Some(transition)) => {
                if !transition.duration_secs.is_finite() || transition.duration_secs <= 0.0 {
                    return Err(ValidationError::invalid_merge(
                        "transition duration must be positive",
                    ));
                }
                let shortest = self
                    .steps
                    .iter()
                    .map(ParameterBundle::rendered_duration_secs)
                    .fold(f64::INFINITY, f64::min);
                if transition.duration_secs >= shortest {
                    return Err(ValidationError::invalid_merge(format!(
                        "transition duration {:.3}s must be shorter than every clip (shortest {:.3}s)",
                        transition.duration_secs, shortest
                    )));
                }
                Ok(())
            }
            (_, Some(_)) => Err(ValidationError::invalid_merge(format!(
                "transition settings are only valid with merge mode 'transition', got '{}'",
                self.merge.mode
            ))),
            (_, None) => Ok(()),
        }
    }

    /// Nominal duration of the merged output.
    pub fn expected_duration_secs(&self) -> f64 {
        let durations = self.steps.iter().map(ParameterBundle::rendered_duration_secs);
        match self.merge.mode {
            MergeMode::Sequence => durations.sum(),
            MergeMode::Overlay => durations.fold(f64::INFINITY, f64::min),
            MergeMode::Transition => {
                let overlap = self.merge.transition.map(|t| t.duration_secs).unwrap_or(0.0);
                let total: f64 = durations.sum();
                total - overlap * self.steps.len().saturating_sub(1) as f64
            }
        }
    }
}
