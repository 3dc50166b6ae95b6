use crate::progress::spinner;
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use pageview_cube::models::HiveConfig;
use pageview_cube::{frame_from_tsv, HiveEngine, HiveJob};
use polars::prelude::DataFrame;
use regex::Regex;
use std::io::Write;
use std::process::{Command, Stdio};

/// Submits Hive jobs on a remote host over ssh and fetches the tab-separated result
pub struct SshHiveEngine {
    config: HiveConfig,
}

impl SshHiveEngine {
    pub fn new(config: HiveConfig) -> Self {
        Self { config }
    }

    fn remote_path(&self, job: &HiveJob, extension: &str) -> String {
        format!(
            "{}/{}.{}",
            self.config.remote_dir.trim_end_matches('/'),
            job.name,
            extension
        )
    }

    fn ssh(&self, remote_command: &str, stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        debug!("ssh {} '{}'", self.config.ssh_host, remote_command);
        let mut child = Command::new("ssh")
            .arg(&self.config.ssh_host)
            .arg(remote_command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start ssh to {}", self.config.ssh_host))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            bail!(
                "'{}' on {} exited with {}: {}",
                remote_command,
                self.config.ssh_host,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }

    fn run_and_fetch(&self, script: &str, job: &HiveJob) -> Result<Vec<u8>> {
        let query_path = self.remote_path(job, "hql");
        let result_path = self.remote_path(job, "tsv");

        let pb = spinner(format!("Hive job {} on {}", job.name, self.config.ssh_host));
        let run = self.ssh(
            &format!(
                "cat > {q} && hive -S -f {q} > {r}",
                q = query_path,
                r = result_path
            ),
            Some(script.as_bytes()),
        );
        pb.finish_and_clear();
        run?;

        self.ssh(&format!("cat {}", result_path), None)
    }

    fn cleanup(&self, job: &HiveJob) {
        let command = format!(
            "rm -f {} {}",
            self.remote_path(job, "hql"),
            self.remote_path(job, "tsv")
        );
        if let Err(e) = self.ssh(&command, None) {
            warn!("Failed to remove remote files for {}: {}", job.name, e);
        }
    }
}

impl HiveEngine for SshHiveEngine {
    fn submit(&self, sql: &str, job: &HiveJob) -> Result<DataFrame> {
        validate_job_name(&job.name)?;
        let script = hive_script(sql, job);

        info!("Submitting Hive job {} (priority: {})", job.name, job.priority);
        let result = self.run_and_fetch(&script, job);
        if job.delete {
            self.cleanup(job);
        }
        frame_from_tsv(result?)
    }
}

/// Job names end up in remote file paths
pub fn validate_job_name(name: &str) -> Result<()> {
    let re = Regex::new(r"^[A-Za-z0-9_-]+$")?;
    if !re.is_match(name) {
        bail!("Invalid Hive job name '{}'", name);
    }
    Ok(())
}

/// Session settings followed by the query itself
pub fn hive_script(sql: &str, job: &HiveJob) -> String {
    let mut script = format!(
        "SET mapred.job.name={};\nSET hive.cli.print.header=true;\n",
        job.name
    );
    if job.priority {
        script.push_str("SET mapred.job.queue.name=priority;\n");
    }
    let sql = sql.trim();
    script.push_str(sql);
    if !sql.ends_with(';') {
        script.push(';');
    }
    script.push('\n');
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(priority: bool) -> HiveJob {
        HiveJob {
            name: "forecasting_refresh".to_string(),
            priority,
            delete: true,
        }
    }

    #[test]
    fn test_priority_script() {
        let script = hive_script("SELECT 1\n", &job(true));
        assert_eq!(
            script,
            "SET mapred.job.name=forecasting_refresh;\n\
             SET hive.cli.print.header=true;\n\
             SET mapred.job.queue.name=priority;\n\
             SELECT 1;\n"
        );
    }

    #[test]
    fn test_default_queue_script() {
        let script = hive_script("SELECT 1;", &job(false));
        assert!(!script.contains("queue.name"));
        assert!(script.ends_with("SELECT 1;\n"));
    }

    #[test]
    fn test_job_name_validation() {
        assert!(validate_job_name("forecasting_refresh").is_ok());
        assert!(validate_job_name("refresh-2016").is_ok());
        assert!(validate_job_name("x; rm -rf /").is_err());
        assert!(validate_job_name("").is_err());
    }

    #[test]
    fn test_remote_paths() {
        let engine = SshHiveEngine::new(HiveConfig {
            ssh_host: "stat1002.eqiad.wmnet".to_string(),
            remote_dir: "/home/analyst/".to_string(),
        });
        assert_eq!(
            engine.remote_path(&job(true), "tsv"),
            "/home/analyst/forecasting_refresh.tsv"
        );
    }
}
