use crate::country_codes::{enrich_countries, CountryCodes};
use crate::cube_builder::CubeBuilder;
use crate::data_loader::{combine, AnalyticsStore, DataLoader, HiveEngine};
use crate::models::{PipelineConfig, PipelineSummary};
use crate::output::{write_checkpoint, write_cube};
use anyhow::Result;
use log::info;

/// Fetch, combine, enrich, checkpoint, pivot, write. Any failure aborts the run.
pub struct Pipeline<S, H> {
    loader: DataLoader<S, H>,
    config: PipelineConfig,
}

impl<S: AnalyticsStore, H: HiveEngine> Pipeline<S, H> {
    pub fn new(store: S, hive: H, config: PipelineConfig) -> Self {
        Self {
            loader: DataLoader::new(store, hive),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> Result<PipelineSummary> {
        let config = &self.config;
        let mut summary = PipelineSummary::default();

        let pre = self.loader.load_pre_period(config)?;
        let post = self.loader.load_post_period(config)?;
        summary.pre_rows = pre.len();
        summary.post_rows = post.len();
        let combined = combine(pre, post);

        let codes = CountryCodes::from_csv_file(&config.country_codes_path)?;
        let (enriched, unmapped) = enrich_countries(combined, &codes);
        summary.enriched_rows = enriched.len();
        summary.unmapped_rows = unmapped;

        write_checkpoint(&enriched, &config.checkpoint_path)?;
        info!(
            "Wrote {} rows to {:?}",
            enriched.len(),
            config.checkpoint_path
        );

        let cube = CubeBuilder::from_config(config).build(&enriched);
        summary.cube_columns = cube.width();
        summary.cube_months = cube.height();
        summary.dropped_columns = cube.malformed_columns;

        write_cube(&cube, &config.cube_path)?;
        info!(
            "Wrote {} months x {} series to {:?}",
            cube.height(),
            cube.width(),
            config.cube_path
        );

        Ok(summary)
    }
}
