use serde::Serialize;
use tracing::info;

use crate::cache::{CachedFetcher, ResponseCache};
use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::fetch::HttpFetcher;
use crate::pipeline::{Pipeline, PlanSummary, RunSummary};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResult {
    pub checkpoint: String,
    pub removed: bool,
}

/// Wires a [`HarvestConfig`] to the pipeline and the real HTTP stack.
pub struct App {
    config: HarvestConfig,
    pipeline: Pipeline,
}

impl App {
    pub fn new(config: HarvestConfig) -> Result<Self, HarvestError> {
        let pipeline = Pipeline::from_config(&config)?;
        Ok(Self { config, pipeline })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary, HarvestError> {
        let settings = self.config.fetch_settings();
        if self.config.use_cache {
            let cache = ResponseCache::new(self.config.cache_dir.clone());
            info!(cache = %cache.root(), "response cache enabled");
            self.pipeline.run(|| {
                let client = HttpFetcher::new(settings.clone())?;
                Ok(CachedFetcher::new(cache.clone(), client))
            })
        } else {
            self.pipeline.run(|| HttpFetcher::new(settings.clone()))
        }
    }

    pub fn status(&self) -> Result<PlanSummary, HarvestError> {
        Ok(self.pipeline.plan()?.summary())
    }

    pub fn reset(&self) -> Result<ResetResult, HarvestError> {
        let checkpoint = self.pipeline.checkpoint_file();
        let removed = checkpoint.clear()?;
        info!(path = %checkpoint.path(), removed, "checkpoint reset");
        Ok(ResetResult {
            checkpoint: checkpoint.path().to_string(),
            removed,
        })
    }
}
