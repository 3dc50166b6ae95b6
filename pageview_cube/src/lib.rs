pub mod country_codes;
pub mod cube_builder;
pub mod data_loader;
pub mod models;
pub mod output;
pub mod pipeline;

pub use country_codes::{enrich_countries, CountryCodes};
pub use cube_builder::{Cube, CubeBuilder, Observation};
pub use data_loader::{frame_from_tsv, AnalyticsStore, DataLoader, HiveEngine};
pub use models::{EnrichedRow, HiveJob, PageviewRow, PipelineConfig, PipelineSummary, SeriesKey};
pub use pipeline::Pipeline;
