use crate::models::{HiveJob, PageviewRow, PipelineConfig};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};
use polars::prelude::*;
use std::collections::HashMap;
use std::io::Cursor;

/// Sampled historical store: query text plus named parameters
pub trait AnalyticsStore {
    fn query(&self, sql: &str, params: &HashMap<String, String>) -> Result<DataFrame>;
}

/// Unsampled distributed engine; blocks until the remote job finishes
pub trait HiveEngine {
    fn submit(&self, sql: &str, job: &HiveJob) -> Result<DataFrame>;
}

impl<T: AnalyticsStore + ?Sized> AnalyticsStore for &T {
    fn query(&self, sql: &str, params: &HashMap<String, String>) -> Result<DataFrame> {
        (**self).query(sql, params)
    }
}

impl<T: HiveEngine + ?Sized> HiveEngine for &T {
    fn submit(&self, sql: &str, job: &HiveJob) -> Result<DataFrame> {
        (**self).submit(sql, job)
    }
}

pub struct DataLoader<S, H> {
    store: S,
    hive: H,
}

impl<S: AnalyticsStore, H: HiveEngine> DataLoader<S, H> {
    pub fn new(store: S, hive: H) -> Self {
        Self { store, hive }
    }

    /// Monthly counts before the cutover, from the sampled store
    pub fn load_pre_period(&self, config: &PipelineConfig) -> Result<Vec<PageviewRow>> {
        debug!("Pre-period query: {}", config.pre_query);
        let df = self
            .store
            .query(&config.pre_query, &config.pre_params)
            .context("Pre-period query failed")?;

        let rows = rows_from_pre_frame(&df)?;
        let rows = drop_cutover_month(rows, config.cutover_date);
        info!("Loaded {} pre-period rows", rows.len());
        Ok(rows)
    }

    /// Monthly counts from the cutover year on, from the distributed engine
    pub fn load_post_period(&self, config: &PipelineConfig) -> Result<Vec<PageviewRow>> {
        debug!("Post-period query ({}): {}", config.hive_job.name, config.post_query);
        let df = self
            .hive
            .submit(&config.post_query, &config.hive_job)
            .context("Post-period query failed")?;

        let rows = rows_from_post_frame(&df)?;
        info!("Loaded {} post-period rows", rows.len());
        Ok(rows)
    }

    /// Both periods stacked in one long-form table
    pub fn load_combined(&self, config: &PipelineConfig) -> Result<Vec<PageviewRow>> {
        let pre = self.load_pre_period(config)?;
        let post = self.load_post_period(config)?;
        Ok(combine(pre, post))
    }
}

/// Stack rows without dedup or reordering; callers keep the periods disjoint
pub fn combine(mut pre: Vec<PageviewRow>, post: Vec<PageviewRow>) -> Vec<PageviewRow> {
    pre.extend(post);
    pre
}

/// The sampled store only has part of the cutover month
pub fn drop_cutover_month(rows: Vec<PageviewRow>, cutover: NaiveDate) -> Vec<PageviewRow> {
    let before = rows.len();
    let rows: Vec<PageviewRow> = rows.into_iter().filter(|r| r.timestamp != cutover).collect();
    if rows.len() < before {
        warn!(
            "Dropped {} partial rows for cutover month {}",
            before - rows.len(),
            cutover
        );
    }
    rows
}

/// First-of-month date string, e.g. (2015, 3) -> "2015-03-01"
pub fn month_start_timestamp(year: i32, month: u32) -> Result<String> {
    if !(1..=12).contains(&month) {
        bail!("Month {} out of range for year {}", month, year);
    }
    Ok(format!("{:04}-{:02}-01", year, month))
}

/// Rows with `n, timestamp, country_iso, project, access_method`
pub fn rows_from_pre_frame(df: &DataFrame) -> Result<Vec<PageviewRow>> {
    if df.width() == 0 {
        return Ok(Vec::new());
    }
    let counts = text_values(df, "n")?;
    let timestamps = text_values(df, "timestamp")?;
    let codes = text_values(df, "country_iso")?;
    let projects = text_values(df, "project")?;
    let methods = text_values(df, "access_method")?;

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let timestamp = parse_month(required(&timestamps, idx, "timestamp")?)?;
        rows.push(PageviewRow {
            timestamp,
            country_iso: codes.get(idx).cloned().flatten(),
            project: required(&projects, idx, "project")?.to_string(),
            access_method: required(&methods, idx, "access_method")?.to_string(),
            n: parse_count(required(&counts, idx, "n")?)?,
        });
    }
    Ok(rows)
}

/// Rows with `n, year, month, country_iso, project, access_method`
pub fn rows_from_post_frame(df: &DataFrame) -> Result<Vec<PageviewRow>> {
    if df.width() == 0 {
        return Ok(Vec::new());
    }
    let counts = text_values(df, "n")?;
    let years = text_values(df, "year")?;
    let months = text_values(df, "month")?;
    let codes = text_values(df, "country_iso")?;
    let projects = text_values(df, "project")?;
    let methods = text_values(df, "access_method")?;

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let year: i32 = required(&years, idx, "year")?
            .trim()
            .parse()
            .with_context(|| format!("Bad year at row {}", idx))?;
        let month: u32 = required(&months, idx, "month")?
            .trim()
            .parse()
            .with_context(|| format!("Bad month at row {}", idx))?;
        let timestamp = parse_month(&month_start_timestamp(year, month)?)?;

        rows.push(PageviewRow {
            timestamp,
            country_iso: codes.get(idx).cloned().flatten(),
            project: required(&projects, idx, "project")?.to_string(),
            access_method: required(&methods, idx, "access_method")?.to_string(),
            n: parse_count(required(&counts, idx, "n")?)?,
        });
    }
    Ok(rows)
}

/// Parse tab-separated query output with a header row. Every column is read as text.
/// Empty output (a zero-row result without header) gives a frame with no columns.
pub fn frame_from_tsv(bytes: Vec<u8>) -> Result<DataFrame> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(DataFrame::empty());
    }
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(b'\t')
                .with_quote_char(None),
        )
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    Ok(df)
}

fn text_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(name)
        .with_context(|| format!("Query result has no '{}' column", name))?
        .cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(values)
}

fn required<'a>(values: &'a [Option<String>], idx: usize, name: &str) -> Result<&'a str> {
    match values.get(idx) {
        Some(Some(value)) => Ok(value.as_str()),
        _ => bail!("Missing '{}' at row {}", name, idx),
    }
}

fn parse_month(text: &str) -> Result<NaiveDate> {
    let text = text.trim();
    let date = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Bad timestamp '{}'", text))
}

fn parse_count(text: &str) -> Result<u64> {
    let text = text.trim();
    if let Ok(n) = text.parse::<u64>() {
        return Ok(n);
    }
    // Sums can come back as decimals, e.g. "1234.0"
    match text.parse::<f64>() {
        Ok(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as u64),
        _ => bail!("Bad pageview count '{}'", text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeStore {
        df: DataFrame,
    }

    impl AnalyticsStore for FakeStore {
        fn query(&self, _sql: &str, _params: &HashMap<String, String>) -> Result<DataFrame> {
            Ok(self.df.clone())
        }
    }

    struct FakeHive {
        df: DataFrame,
        jobs: RefCell<Vec<HiveJob>>,
    }

    impl HiveEngine for FakeHive {
        fn submit(&self, _sql: &str, job: &HiveJob) -> Result<DataFrame> {
            self.jobs.borrow_mut().push(job.clone());
            Ok(self.df.clone())
        }
    }

    fn pre_frame() -> DataFrame {
        df!(
            "n" => [100i64, 200, 300],
            "timestamp" => ["2015-02-01", "2015-03-01 00:00:00", "2015-04-01"],
            "country_iso" => ["US", "DE", "US"],
            "project" => ["en.wikipedia", "de.wikipedia", "en.wikipedia"],
            "access_method" => ["desktop", "mobile", "desktop"]
        )
        .unwrap()
    }

    fn post_frame() -> DataFrame {
        df!(
            "n" => [5i64, 6, 7],
            "year" => [2015i64, 2015, 2016],
            "month" => [4i64, 11, 1],
            "country_iso" => ["US", "--", "FR"],
            "project" => ["en.wikipedia", "en.wikipedia", "fr.wikipedia"],
            "access_method" => ["desktop", "mobile web", "mobile app"]
        )
        .unwrap()
    }

    #[test]
    fn test_month_start_timestamp_pads_month() {
        assert_eq!(month_start_timestamp(2015, 3).unwrap(), "2015-03-01");
        assert_eq!(month_start_timestamp(2016, 12).unwrap(), "2016-12-01");
        for month in 1..=12 {
            let ts = month_start_timestamp(2020, month).unwrap();
            assert_eq!(ts.len(), 10);
            assert!(ts.ends_with("-01"));
            assert!(NaiveDate::parse_from_str(&ts, "%Y-%m-%d").is_ok());
        }
    }

    #[test]
    fn test_month_start_timestamp_rejects_bad_month() {
        assert!(month_start_timestamp(2015, 0).is_err());
        assert!(month_start_timestamp(2015, 13).is_err());
    }

    #[test]
    fn test_pre_period_excludes_cutover() {
        let config = PipelineConfig::default();
        let hive = FakeHive {
            df: post_frame(),
            jobs: RefCell::new(vec![]),
        };
        let loader = DataLoader::new(FakeStore { df: pre_frame() }, &hive);

        let rows = loader.load_pre_period(&config).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.timestamp != config.cutover_date));
        assert_eq!(rows[1].timestamp, NaiveDate::from_ymd_opt(2015, 3, 1).unwrap());
        assert_eq!(rows[1].n, 200);
    }

    #[test]
    fn test_post_period_synthesizes_timestamps() {
        let config = PipelineConfig::default();
        let hive = FakeHive {
            df: post_frame(),
            jobs: RefCell::new(vec![]),
        };
        let loader = DataLoader::new(FakeStore { df: pre_frame() }, &hive);

        let rows = loader.load_post_period(&config).unwrap();
        let stamps: Vec<String> = rows.iter().map(|r| r.timestamp.to_string()).collect();
        assert_eq!(stamps, vec!["2015-04-01", "2015-11-01", "2016-01-01"]);
        assert_eq!(rows[1].country_iso.as_deref(), Some("--"));
        assert_eq!(rows[2].access_method, "mobile app");

        // Submission parameters reach the engine untouched
        assert_eq!(hive.jobs.borrow().as_slice(), &[config.hive_job.clone()]);
    }

    #[test]
    fn test_combined_keeps_source_order() {
        let config = PipelineConfig::default();
        let hive = FakeHive {
            df: post_frame(),
            jobs: RefCell::new(vec![]),
        };
        let loader = DataLoader::new(FakeStore { df: pre_frame() }, &hive);

        let rows = loader.load_combined(&config).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].n, 100);
        assert_eq!(rows[2].n, 5);
        assert_eq!(rows[4].n, 7);
    }

    #[test]
    fn test_frame_from_tsv() {
        let tsv = b"n\tyear\tmonth\tcountry_iso\tproject\taccess_method\n\
                    12\t2015\t7\tNA\ten.wikipedia\tdesktop\n\
                    3.0\t2016\t10\tNULL\ten.wikipedia\tmobile web\n"
            .to_vec();
        let df = frame_from_tsv(tsv).unwrap();
        assert_eq!(df.height(), 2);

        let rows = rows_from_post_frame(&df).unwrap();
        assert_eq!(rows[0].country_iso.as_deref(), Some("NA"));
        assert_eq!(rows[0].timestamp.to_string(), "2015-07-01");
        assert_eq!(rows[1].n, 3);
        assert_eq!(rows[1].country_iso.as_deref(), Some("NULL"));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let df = df!("n" => [1i64]).unwrap();
        assert!(rows_from_pre_frame(&df).is_err());
    }

    #[test]
    fn test_empty_output_is_zero_rows() {
        let df = frame_from_tsv(Vec::new()).unwrap();
        assert_eq!(df.width(), 0);
        assert!(rows_from_pre_frame(&df).unwrap().is_empty());

        let df = frame_from_tsv(b"\n".to_vec()).unwrap();
        assert!(rows_from_post_frame(&df).unwrap().is_empty());
    }

    #[test]
    fn test_null_country_code_is_kept_as_none() {
        let df = df!(
            "n" => [4i64, 9],
            "year" => [2016i64, 2016],
            "month" => [2i64, 2],
            "country_iso" => [Some("US"), None],
            "project" => ["en.wikipedia", "en.wikipedia"],
            "access_method" => ["desktop", "desktop"]
        )
        .unwrap();
        let rows = rows_from_post_frame(&df).unwrap();
        assert_eq!(rows[0].country_iso.as_deref(), Some("US"));
        assert_eq!(rows[1].country_iso, None);

        // Empty cells in engine output come through as null too
        let tsv = b"n\tyear\tmonth\tcountry_iso\tproject\taccess_method\n\
                    7\t2016\t3\t\ten.wikipedia\tdesktop\n"
            .to_vec();
        let rows = rows_from_post_frame(&frame_from_tsv(tsv).unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].country_iso.as_deref().unwrap_or_default().is_empty());
    }
}
