use crate::progress::spinner;
use anyhow::{bail, Context, Result};
use log::debug;
use pageview_cube::models::AnalyticsStoreConfig;
use pageview_cube::{frame_from_tsv, AnalyticsStore};
use polars::prelude::DataFrame;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::process::Command;

/// Runs queries through the MySQL command-line client in batch mode
pub struct MysqlCliStore {
    config: AnalyticsStoreConfig,
}

impl MysqlCliStore {
    pub fn new(config: AnalyticsStoreConfig) -> Self {
        Self { config }
    }

    fn command(&self, sql: &str) -> Command {
        let mut cmd = Command::new(&self.config.command);
        // --defaults-file is only honoured as the first option
        if let Some(defaults) = &self.config.defaults_file {
            cmd.arg(format!("--defaults-file={}", defaults.display()));
        }
        cmd.arg("--batch")
            .arg("--host")
            .arg(&self.config.host)
            .arg("-e")
            .arg(sql);
        cmd
    }
}

impl AnalyticsStore for MysqlCliStore {
    fn query(&self, sql: &str, params: &HashMap<String, String>) -> Result<DataFrame> {
        let sql = substitute_params(sql, params)?;
        debug!("Running {} against {}", self.config.command, self.config.host);

        let pb = spinner(format!("Querying analytics store {}", self.config.host));
        let output = self
            .command(&sql)
            .output()
            .with_context(|| format!("Failed to run {}", self.config.command))?;
        pb.finish_and_clear();

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.config.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        frame_from_tsv(output.stdout)
    }
}

/// Replace `{name}` placeholders with parameter values
pub fn substitute_params(sql: &str, params: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(r"\{(\w+)\}")?;
    let mut missing = Vec::new();
    let substituted = re
        .replace_all(sql, |caps: &Captures| match params.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing.push(caps[1].to_string());
                caps[0].to_string()
            }
        })
        .into_owned();

    if !missing.is_empty() {
        bail!("No value for query parameters: {}", missing.join(", "));
    }
    Ok(substituted)
}
