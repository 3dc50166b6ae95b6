use crate::models::{EnrichedRow, PipelineConfig, SeriesKey};
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// One count for one series in one month
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub key: SeriesKey,
    pub month: NaiveDate,
    pub n: u64,
}

impl From<&EnrichedRow> for Observation {
    fn from(row: &EnrichedRow) -> Self {
        Self {
            key: row.series_key(),
            month: row.row.timestamp,
            n: row.row.n,
        }
    }
}

/// Wide table: one row per complete month, one column per series
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    pub months: Vec<NaiveDate>,
    pub columns: BTreeMap<SeriesKey, Vec<Option<u64>>>,
    pub separator: char,
    pub below_threshold: usize,
    pub malformed_columns: usize,
}

impl Cube {
    pub fn height(&self) -> usize {
        self.months.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .keys()
            .map(|k| k.column_name(self.separator))
            .collect()
    }

    pub fn value(&self, key: &SeriesKey, month: NaiveDate) -> Option<u64> {
        let idx = self.months.iter().position(|m| *m == month)?;
        self.columns.get(key)?.get(idx).copied().flatten()
    }

    /// Back to long form, skipping empty cells
    pub fn melt(&self) -> Vec<Observation> {
        let mut observations = Vec::new();
        for (key, values) in &self.columns {
            for (month, value) in self.months.iter().zip(values) {
                if let Some(n) = value {
                    observations.push(Observation {
                        key: key.clone(),
                        month: *month,
                        n: *n,
                    });
                }
            }
        }
        observations
    }
}

#[derive(Debug, Clone)]
pub struct CubeBuilder {
    min_views: u64,
    separator: char,
    drop_incomplete_month: bool,
}

impl CubeBuilder {
    pub fn new(min_views: u64, separator: char) -> Self {
        Self {
            min_views,
            separator,
            drop_incomplete_month: true,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.min_views, config.separator)
    }

    /// Keep the most recent month, for input that is already complete
    pub fn keep_incomplete_month(mut self) -> Self {
        self.drop_incomplete_month = false;
        self
    }

    pub fn build(&self, rows: &[EnrichedRow]) -> Cube {
        self.build_from_observations(rows.iter().map(Observation::from))
    }

    pub fn build_from_observations<I>(&self, observations: I) -> Cube
    where
        I: IntoIterator<Item = Observation>,
    {
        let (mut months, groups) = group_series(observations);
        let total_groups = groups.len();

        let retained = retain_above_threshold(groups, self.min_views);
        let below_threshold = total_groups - retained.len();

        let (retained, malformed_columns) = retain_well_formed(retained, self.separator);
        if malformed_columns > 0 {
            warn!(
                "Excluded {} series whose names do not split into three parts",
                malformed_columns
            );
        }

        // Align every series on the shared month index
        let mut columns: BTreeMap<SeriesKey, Vec<Option<u64>>> = retained
            .into_iter()
            .map(|(key, series)| {
                let values = months.iter().map(|m| series.get(m).copied()).collect();
                (key, values)
            })
            .collect();

        if self.drop_incomplete_month {
            drop_incomplete_month(&mut months, &mut columns);
        }

        info!(
            "Built cube: {} months x {} series ({} below {} views)",
            months.len(),
            columns.len(),
            below_threshold,
            self.min_views
        );

        Cube {
            months,
            columns,
            separator: self.separator,
            below_threshold,
            malformed_columns,
        }
    }
}

type SeriesGroups = BTreeMap<SeriesKey, BTreeMap<NaiveDate, u64>>;

/// Partition by series key; repeated (key, month) pairs are summed
pub fn group_series<I>(observations: I) -> (Vec<NaiveDate>, SeriesGroups)
where
    I: IntoIterator<Item = Observation>,
{
    let mut months = BTreeSet::new();
    let mut groups: SeriesGroups = BTreeMap::new();

    for obs in observations {
        months.insert(obs.month);
        *groups
            .entry(obs.key)
            .or_default()
            .entry(obs.month)
            .or_insert(0) += obs.n;
    }

    (months.into_iter().collect(), groups)
}

/// Strictly greater than: a series exactly at the threshold is excluded
pub fn retain_above_threshold(groups: SeriesGroups, min_views: u64) -> SeriesGroups {
    groups
        .into_iter()
        .filter(|(_, series)| series.values().sum::<u64>() > min_views)
        .collect()
}

pub fn is_well_formed_column(name: &str, separator: char) -> bool {
    name.split(separator).count() == 3
}

fn retain_well_formed(groups: SeriesGroups, separator: char) -> (SeriesGroups, usize) {
    let before = groups.len();
    let kept: SeriesGroups = groups
        .into_iter()
        .filter(|(key, _)| is_well_formed_column(&key.column_name(separator), separator))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// The newest month is still being aggregated
pub fn drop_incomplete_month(
    months: &mut Vec<NaiveDate>,
    columns: &mut BTreeMap<SeriesKey, Vec<Option<u64>>>,
) {
    if months.pop().is_some() {
        for values in columns.values_mut() {
            values.pop();
        }
    }
}
