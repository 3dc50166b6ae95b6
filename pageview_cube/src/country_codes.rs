use crate::models::{EnrichedRow, PageviewRow};
use anyhow::{Context, Result};
use log::{info, warn};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;

pub const CODE_COLUMN: &str = "ISO 3166-1 2 Letter Code";
pub const NAME_COLUMN: &str = "Common Name";
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// ISO 3166-1 alpha-2 code to common country name
#[derive(Debug, Clone)]
pub struct CountryCodes {
    names: HashMap<String, String>,
}

impl CountryCodes {
    /// Load the reference table from CSV
    pub fn from_csv_file(path: &Path) -> Result<Self> {
        // Every column as text so codes like "NA" stay codes
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()
            .with_context(|| format!("Failed to read country codes from {:?}", path))?;

        let codes = df.column(CODE_COLUMN)?.str()?;
        let names = df.column(NAME_COLUMN)?.str()?;

        let mut mapping = HashMap::new();
        for idx in 0..df.height() {
            if let (Some(code), Some(name)) = (codes.get(idx), names.get(idx)) {
                mapping.insert(code.to_string(), name.to_string());
            }
        }

        info!("Loaded {} country codes from {:?}", mapping.len(), path);
        Ok(Self::new(mapping))
    }

    /// Build from an explicit mapping, adding the sentinels for unknown traffic
    pub fn new(mut names: HashMap<String, String>) -> Self {
        names.insert(UNKNOWN_COUNTRY.to_string(), UNKNOWN_COUNTRY.to_string());
        names.insert("--".to_string(), UNKNOWN_COUNTRY.to_string());
        Self { names }
    }

    pub fn country_name(&self, code: &str) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Attach country names, dropping rows whose code has no entry.
/// Returns the enriched rows and the number dropped.
pub fn enrich_countries(rows: Vec<PageviewRow>, codes: &CountryCodes) -> (Vec<EnrichedRow>, usize) {
    let total = rows.len();
    let enriched: Vec<EnrichedRow> = rows
        .into_iter()
        .filter_map(|row| {
            let country = codes.country_name(row.country_iso.as_deref()?)?.to_string();
            Some(EnrichedRow { row, country })
        })
        .collect();

    let dropped = total - enriched.len();
    if dropped > 0 {
        warn!("Dropped {} rows with unmapped country codes", dropped);
    }
    (enriched, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn row(code: &str) -> PageviewRow {
        PageviewRow {
            timestamp: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
            country_iso: Some(code.to_string()),
            project: "en.wikipedia".to_string(),
            access_method: "desktop".to_string(),
            n: 10,
        }
    }

    fn codes() -> CountryCodes {
        let mut names = HashMap::new();
        names.insert("US".to_string(), "United States".to_string());
        names.insert("DE".to_string(), "Germany".to_string());
        CountryCodes::new(names)
    }

    #[test]
    fn test_sentinels_added() {
        let codes = codes();
        assert_eq!(codes.country_name("--"), Some("Unknown"));
        assert_eq!(codes.country_name("Unknown"), Some("Unknown"));
        assert_eq!(codes.len(), 4);
    }

    #[test]
    fn test_unmapped_codes_dropped() {
        let rows = vec![row("US"), row("XX"), row("--")];
        let (enriched, dropped) = enrich_countries(rows, &codes());

        assert_eq!(dropped, 1);
        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched[0].row.country_iso.as_deref(), Some("US"));
        assert_eq!(enriched[0].country, "United States");
        assert_eq!(enriched[1].row.country_iso.as_deref(), Some("--"));
        assert_eq!(enriched[1].country, "Unknown");
    }

    #[test]
    fn test_null_code_dropped() {
        let mut missing = row("US");
        missing.country_iso = None;
        let (enriched, dropped) = enrich_countries(vec![row("DE"), missing], &codes());

        assert_eq!(dropped, 1);
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].country, "Germany");
    }

    #[test]
    fn test_load_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Sort Order,Common Name,ISO 3166-1 2 Letter Code").unwrap();
        writeln!(file, "1,Namibia,NA").unwrap();
        writeln!(file, "2,Germany,DE").unwrap();
        file.flush().unwrap();

        let codes = CountryCodes::from_csv_file(file.path()).unwrap();
        assert_eq!(codes.country_name("NA"), Some("Namibia"));
        assert_eq!(codes.country_name("DE"), Some("Germany"));
        assert_eq!(codes.country_name("--"), Some("Unknown"));
        assert_eq!(codes.country_name("FR"), None);
    }
}
