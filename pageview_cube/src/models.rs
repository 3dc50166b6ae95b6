use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// First month covered by the unsampled engine; partial in the sampled store
    pub cutover_date: NaiveDate,
    pub post_start_year: i32,
    pub pre_query: String,
    pub pre_params: HashMap<String, String>,
    pub post_query: String,
    pub hive_job: HiveJob,
    pub country_codes_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub cube_path: PathBuf,
    pub min_views: u64,
    pub separator: char,
    pub analytics_store: AnalyticsStoreConfig,
    pub hive: HiveConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let post_start_year = 2015;
        Self {
            cutover_date: NaiveDate::from_ymd_opt(2015, 4, 1).unwrap_or_default(),
            post_start_year,
            pre_query: PRE_PERIOD_QUERY.to_string(),
            pre_params: HashMap::new(),
            post_query: post_period_query(post_start_year),
            hive_job: HiveJob::default(),
            country_codes_path: PathBuf::from("data/country_codes.csv"),
            checkpoint_path: PathBuf::from("data/checkpoint.csv"),
            cube_path: PathBuf::from("data/cube.csv"),
            min_views: 1_000_000,
            separator: '/',
            analytics_store: AnalyticsStoreConfig::default(),
            hive: HiveConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Move both output artifacts under `dir`, keeping their file names
    pub fn with_output_dir(mut self, dir: &std::path::Path) -> Self {
        for path in [&mut self.checkpoint_path, &mut self.cube_path] {
            if let Some(name) = path.file_name() {
                *path = dir.join(name);
            }
        }
        self
    }
}

pub const PRE_PERIOD_QUERY: &str = "
SELECT
    SUM(pageviews) AS n,
    timestamp,
    country_iso,
    project,
    access_method
FROM staging.pentahoviews05
WHERE is_spider = 0
AND is_automata = 0
AND project RLIKE 'wikipedia'
GROUP BY timestamp, country_iso, project, access_method
";

pub fn post_period_query(start_year: i32) -> String {
    format!(
        "
SELECT
    SUM(view_count) AS n,
    year,
    month,
    country_code AS country_iso,
    project,
    access_method
FROM wmf.projectview_hourly
WHERE agent_type = 'user'
AND project RLIKE 'wikipedia'
AND year >= {}
GROUP BY year, month, country_code, project, access_method
",
        start_year
    )
}

/// Submission parameters handed to the distributed engine as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveJob {
    pub name: String,
    pub priority: bool,
    pub delete: bool,
}

impl Default for HiveJob {
    fn default() -> Self {
        Self {
            name: "forecasting_refresh".to_string(),
            priority: true,
            delete: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsStoreConfig {
    pub command: String,
    pub host: String,
    pub defaults_file: Option<PathBuf>,
}

impl Default for AnalyticsStoreConfig {
    fn default() -> Self {
        Self {
            command: "mysql".to_string(),
            host: "analytics-store.eqiad.wmnet".to_string(),
            defaults_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    pub ssh_host: String,
    pub remote_dir: String,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            ssh_host: "stat1002.eqiad.wmnet".to_string(),
            remote_dir: "/tmp".to_string(),
        }
    }
}

/// One monthly aggregate as returned by either source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageviewRow {
    pub timestamp: NaiveDate,
    /// Null when the source has no code; such rows never enrich
    pub country_iso: Option<String>,
    pub project: String,
    pub access_method: String,
    pub n: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub row: PageviewRow,
    pub country: String,
}

impl EnrichedRow {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            project: self.row.project.clone(),
            access_method: self.row.access_method.clone(),
            country: self.country.clone(),
        }
    }
}

/// Identity of one cube column
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub project: String,
    pub access_method: String,
    pub country: String,
}

impl SeriesKey {
    pub fn new(project: &str, access_method: &str, country: &str) -> Self {
        Self {
            project: project.to_string(),
            access_method: access_method.to_string(),
            country: country.to_string(),
        }
    }

    pub fn column_name(&self, separator: char) -> String {
        let sep = separator.to_string();
        [
            self.project.as_str(),
            self.access_method.as_str(),
            self.country.as_str(),
        ]
        .join(&sep)
    }

    pub fn parse(name: &str, separator: char) -> Option<Self> {
        let parts: Vec<&str> = name.split(separator).collect();
        match parts.as_slice() {
            [project, access_method, country] => Some(Self::new(project, access_method, country)),
            _ => None,
        }
    }
}

/// Counts at each stage of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub pre_rows: usize,
    pub post_rows: usize,
    pub enriched_rows: usize,
    pub unmapped_rows: usize,
    pub cube_columns: usize,
    pub dropped_columns: usize,
    pub cube_months: usize,
}
