use crate::cube_builder::{is_well_formed_column, Cube};
use crate::models::{EnrichedRow, SeriesKey};
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub const CHECKPOINT_HEADER: [&str; 7] = [
    "timestamp",
    "n",
    "timestamp",
    "country_iso",
    "project",
    "access_method",
    "country",
];

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }
    Ok(())
}

/// Long-form enriched rows, month index first
pub fn write_checkpoint(rows: &[EnrichedRow], path: &Path) -> Result<()> {
    create_parent_dir(path)?;
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create checkpoint {:?}", path))?;
    write_checkpoint_to(rows, file)
}

pub fn write_checkpoint_to<W: Write>(rows: &[EnrichedRow], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CHECKPOINT_HEADER)?;

    for enriched in rows {
        let row = &enriched.row;
        let timestamp = row.timestamp.format(DATE_FORMAT).to_string();
        let n = row.n.to_string();
        wtr.write_record([
            timestamp.as_str(),
            n.as_str(),
            timestamp.as_str(),
            row.country_iso.as_deref().unwrap_or_default(),
            row.project.as_str(),
            row.access_method.as_str(),
            enriched.country.as_str(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Wide cube: `timestamp` then one column per series, no index
pub fn write_cube(cube: &Cube, path: &Path) -> Result<()> {
    create_parent_dir(path)?;
    let file =
        fs::File::create(path).with_context(|| format!("Failed to create cube {:?}", path))?;
    write_cube_to(cube, file)
}

pub fn write_cube_to<W: Write>(cube: &Cube, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["timestamp".to_string()];
    header.extend(cube.column_names());
    wtr.write_record(&header)?;

    for (idx, month) in cube.months.iter().enumerate() {
        let mut record = Vec::with_capacity(cube.width() + 1);
        record.push(month.format(DATE_FORMAT).to_string());
        for values in cube.columns.values() {
            record.push(match values.get(idx).copied().flatten() {
                Some(n) => n.to_string(),
                None => String::new(),
            });
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Load a cube artifact. Columns whose names do not split into three parts are skipped.
pub fn read_cube_csv(path: &Path, separator: char) -> Result<Cube> {
    let file =
        fs::File::open(path).with_context(|| format!("Failed to open cube {:?}", path))?;
    read_cube_from(file, separator)
}

pub fn read_cube_from<R: Read>(reader: R, separator: char) -> Result<Cube> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();

    match headers.get(0) {
        Some("timestamp") => {}
        other => bail!("Expected a leading timestamp column, found {:?}", other),
    }

    let mut keys: Vec<Option<SeriesKey>> = Vec::new();
    let mut malformed_columns = 0;
    for name in headers.iter().skip(1) {
        let key = if is_well_formed_column(name, separator) {
            SeriesKey::parse(name, separator)
        } else {
            None
        };
        if key.is_none() {
            malformed_columns += 1;
        }
        keys.push(key);
    }

    let mut months = Vec::new();
    let mut columns: BTreeMap<SeriesKey, Vec<Option<u64>>> = keys
        .iter()
        .flatten()
        .map(|k| (k.clone(), Vec::new()))
        .collect();

    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let stamp = record.get(0).unwrap_or_default();
        let month = NaiveDate::parse_from_str(stamp, DATE_FORMAT)
            .with_context(|| format!("Bad timestamp '{}' on data row {}", stamp, line + 1))?;
        months.push(month);

        for (key, cell) in keys.iter().zip(record.iter().skip(1)) {
            let Some(key) = key else { continue };
            let value = if cell.is_empty() {
                None
            } else {
                Some(cell.parse::<u64>().with_context(|| {
                    format!("Bad count '{}' on data row {}", cell, line + 1)
                })?)
            };
            if let Some(values) = columns.get_mut(key) {
                values.push(value);
            }
        }
    }

    Ok(Cube {
        months,
        columns,
        separator,
        below_threshold: 0,
        malformed_columns,
    })
}
