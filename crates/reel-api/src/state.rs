//! Application state.

use std::sync::Arc;

use anyhow::Context;
use reel_media::FfmpegMerger;
use reel_models::{EffectCatalog, ParameterBuilder};
use reel_worker::{JobStore, RenderOrchestrator, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: RenderOrchestrator,
    pub builder: Arc<dyn ParameterBuilder>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        orchestrator: RenderOrchestrator,
        builder: Arc<dyn ParameterBuilder>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            builder,
        }
    }

    /// Build state from the environment: effect catalog, worker config and
    /// the ffmpeg merger.
    pub fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let catalog = EffectCatalog::from_json_file(&config.catalog_path).with_context(|| {
            format!(
                "failed to load effect catalog from {}",
                config.catalog_path.display()
            )
        })?;
        let builder: Arc<dyn ParameterBuilder> = Arc::new(catalog);

        let worker = WorkerConfig::from_env();
        let merger = Arc::new(FfmpegMerger::new(
            worker.ffmpeg_path.clone(),
            worker.ffprobe_path.clone(),
        ));
        let orchestrator =
            RenderOrchestrator::new(worker, Arc::new(JobStore::new()), Arc::clone(&builder), merger);

        Ok(Self::new(config, orchestrator, builder))
    }

    pub fn store(&self) -> &Arc<JobStore> {
        self.orchestrator.store()
    }
}
