//! Request bodies accepted by the job API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::catalog::ParameterBuilder;
use crate::composite::{CompositeSpec, MergeConfig, MergeMode, TransitionSpec};
use crate::effect::{Resolution, ValidationError};

/// One effect entry in a composite request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompositeEffectEntry {
    #[validate(length(min = 1, max = 128))]
    pub effect_id: String,
    #[serde(default)]
    pub params: Value,
}

/// Body of `POST /jobs/composite`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompositeJobRequest {
    #[validate(length(min = 1, max = 32), nested)]
    pub effects: Vec<CompositeEffectEntry>,
    #[serde(default)]
    pub merge_mode: MergeMode,
    /// Target width; defaults to the first effect's width
    #[serde(default)]
    pub width: Option<u32>,
    /// Target height; defaults to the first effect's height
    #[serde(default)]
    pub height: Option<u32>,
    /// Target frame rate; defaults to the first effect's frame rate
    #[serde(default)]
    #[validate(range(min = 1, max = 120))]
    pub fps: Option<u32>,
    #[serde(default)]
    pub transition: Option<TransitionSpec>,
}

impl CompositeJobRequest {
    /// Build every entry through `builder` and assemble a validated spec.
    pub fn build_spec(&self, builder: &dyn ParameterBuilder) -> Result<CompositeSpec, ValidationError> {
        if self.effects.is_empty() {
            return Err(ValidationError::EmptyComposite);
        }
        self.validate()
            .map_err(|e| ValidationError::InvalidRequest(e.to_string()))?;

        let steps = self
            .effects
            .iter()
            .map(|entry| builder.build(&entry.effect_id, &entry.params))
            .collect::<Result<Vec<_>, _>>()?;

        let first = &steps[0];
        let merge = MergeConfig {
            mode: self.merge_mode,
            resolution: Resolution::new(
                self.width.unwrap_or(first.resolution.width),
                self.height.unwrap_or(first.resolution.height),
            ),
            fps: self.fps.unwrap_or(first.fps),
            transition: self.transition,
        };

        let spec = CompositeSpec { steps, merge };
        spec.validate()?;
        Ok(spec)
    }
}
