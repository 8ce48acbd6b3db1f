//! Parameter builder contract and the catalog-backed implementation.
//!
//! The catalog is a JSON file describing each effect the renderer knows:
//!
//! ```json
//! {
//!   "effects": [
//!     {
//!       "id": "glitch-text",
//!       "composition_id": "GlitchText",
//!       "entry_module": "src/index.ts",
//!       "working_dir": "effects/glitch-text",
//!       "fps": 30,
//!       "duration_secs": 5,
//!       "width": 1080,
//!       "height": 1920,
//!       "required_fields": ["text"],
//!       "defaults": { "color": "#ffffff" }
//!     }
//!   ]
//! }
//! ```
//!
//! Relative `working_dir` entries resolve against the catalog file's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::effect::{ParameterBundle, Resolution, ValidationError};

/// Effect IDs that would shadow API routes.
const RESERVED_EFFECT_IDS: &[&str] = &["composite"];

/// Raw request keys accepted for the render duration.
const DURATION_KEYS: &[&str] = &["duration", "durationInSeconds", "duration_secs"];

/// Turns raw request fields into validated render bundles.
pub trait ParameterBuilder: Send + Sync {
    /// Build a bundle for `effect_id` from raw request fields.
    fn build(&self, effect_id: &str, raw: &Value) -> Result<ParameterBundle, ValidationError>;

    /// Re-run the per-effect checks against an already built bundle.
    fn validate(&self, bundle: &ParameterBundle) -> Result<(), ValidationError>;

    /// IDs of the effects this builder accepts.
    fn effect_ids(&self) -> Vec<String>;
}

/// Catalog loading errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read effect catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse effect catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid effect catalog: {0}")]
    Invalid(String),
}

/// One effect the renderer can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectDefinition {
    pub id: String,
    pub composition_id: String,
    #[serde(default = "default_entry_module")]
    pub entry_module: String,
    pub working_dir: PathBuf,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

fn default_entry_module() -> String {
    "src/index.ts".to_string()
}

fn default_fps() -> u32 {
    30
}

fn default_duration_secs() -> f64 {
    5.0
}

fn default_width() -> u32 {
    1080
}

fn default_height() -> u32 {
    1920
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    effects: Vec<EffectDefinition>,
}

/// Parameter builder backed by a fixed set of effect definitions.
#[derive(Debug, Clone, Default)]
pub struct EffectCatalog {
    effects: BTreeMap<String, EffectDefinition>,
}

impl EffectCatalog {
    /// Build a catalog from definitions, rejecting duplicates and reserved IDs.
    pub fn new(definitions: Vec<EffectDefinition>) -> Result<Self, CatalogError> {
        let mut effects = BTreeMap::new();
        for definition in definitions {
            if definition.id.trim().is_empty() {
                return Err(CatalogError::Invalid("effect id must not be empty".to_string()));
            }
            if RESERVED_EFFECT_IDS.contains(&definition.id.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "effect id '{}' is reserved",
                    definition.id
                )));
            }
            if effects.contains_key(&definition.id) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate effect id '{}'",
                    definition.id
                )));
            }
            effects.insert(definition.id.clone(), definition);
        }
        Ok(Self { effects })
    }

    /// Parse a catalog from JSON, resolving relative working directories against `base_dir`.
    pub fn from_json_str(json: &str, base_dir: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let definitions = file
            .effects
            .into_iter()
            .map(|mut definition| {
                if definition.working_dir.is_relative() {
                    definition.working_dir = base_dir.join(&definition.working_dir);
                }
                definition
            })
            .collect();
        Self::new(definitions)
    }

    /// Load a catalog file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json_str(&json, base_dir)
    }

    pub fn get(&self, effect_id: &str) -> Option<&EffectDefinition> {
        self.effects.get(effect_id)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    fn definition(&self, effect_id: &str) -> Result<&EffectDefinition, ValidationError> {
        self.effects
            .get(effect_id)
            .ok_or_else(|| ValidationError::UnknownEffect(effect_id.to_string()))
    }
}

impl ParameterBuilder for EffectCatalog {
    fn build(&self, effect_id: &str, raw: &Value) -> Result<ParameterBundle, ValidationError> {
        let definition = self.definition(effect_id)?;

        let raw = match raw {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(ValidationError::InvalidRequest(
                    "parameters must be a JSON object".to_string(),
                ))
            }
        };

        check_required_fields(definition, &raw)?;

        let duration_secs = match DURATION_KEYS.iter().find_map(|key| raw.get(*key)) {
            Some(value) => value
                .as_f64()
                .ok_or_else(|| ValidationError::invalid_field("duration", "must be a number"))?,
            None => definition.duration_secs,
        };
        let fps = read_u32(&raw, "fps")?.unwrap_or(definition.fps);
        let width = read_u32(&raw, "width")?.unwrap_or(definition.width);
        let height = read_u32(&raw, "height")?.unwrap_or(definition.height);

        let mut props = definition.defaults.clone();
        props.extend(raw);

        let bundle = ParameterBundle {
            effect_id: definition.id.clone(),
            composition_id: definition.composition_id.clone(),
            entry_module: definition.entry_module.clone(),
            working_dir: definition.working_dir.clone(),
            fps,
            duration_secs,
            resolution: Resolution::new(width, height),
            props: Value::Object(props),
        };
        bundle.validate()?;
        Ok(bundle)
    }

    fn validate(&self, bundle: &ParameterBundle) -> Result<(), ValidationError> {
        let definition = self.definition(&bundle.effect_id)?;
        if definition.composition_id != bundle.composition_id {
            return Err(ValidationError::invalid_field(
                "composition_id",
                format!(
                    "effect '{}' renders '{}', not '{}'",
                    definition.id, definition.composition_id, bundle.composition_id
                ),
            ));
        }
        bundle.validate()?;
        match &bundle.props {
            Value::Object(props) => check_required_fields(definition, props),
            _ => Err(ValidationError::invalid_field("props", "must be a JSON object")),
        }
    }

    fn effect_ids(&self) -> Vec<String> {
        self.effects.keys().cloned().collect()
    }
}

fn check_required_fields(
    definition: &EffectDefinition,
    fields: &Map<String, Value>,
) -> Result<(), ValidationError> {
    for field in &definition.required_fields {
        let present = match fields.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ValidationError::missing_field(&definition.id, field));
        }
    }
    Ok(())
}

fn read_u32(raw: &Map<String, Value>, key: &str) -> Result<Option<u32>, ValidationError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| ValidationError::invalid_field(key, "must be a positive integer")),
    }
}
