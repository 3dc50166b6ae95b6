use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pageview_cube::{Pipeline, PipelineConfig};
use std::path::PathBuf;

mod analytics_store;
mod hive_engine;
mod progress;

use analytics_store::MysqlCliStore;
use hive_engine::SshHiveEngine;

#[derive(Parser)]
#[command(name = "pageview_pipeline")]
#[command(about = "Refresh the monthly Wikipedia pageview cube")]
struct Args {
    /// JSON file overriding the built-in configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum total views for a series to get a cube column
    #[arg(long)]
    min_views: Option<u64>,

    /// Directory for the checkpoint and cube CSV files
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(min_views) = args.min_views {
        config.min_views = min_views;
    }
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    println!("🚀 Pageview cube refresh");
    println!("{}", "=".repeat(60));
    info!(
        "Cutover {}, min views {}, output {:?} / {:?}",
        config.cutover_date, config.min_views, config.checkpoint_path, config.cube_path
    );

    let start = std::time::Instant::now();
    let store = MysqlCliStore::new(config.analytics_store.clone());
    let hive = SshHiveEngine::new(config.hive.clone());
    let pipeline = Pipeline::new(store, hive, config);
    let summary = pipeline.run()?;

    println!("\n📊 Summary:");
    println!("  Pre-period rows:   {}", summary.pre_rows);
    println!("  Post-period rows:  {}", summary.post_rows);
    println!(
        "  Enriched rows:     {} ({} unmapped dropped)",
        summary.enriched_rows, summary.unmapped_rows
    );
    println!(
        "  Cube:              {} months x {} series",
        summary.cube_months, summary.cube_columns
    );
    if summary.dropped_columns > 0 {
        println!("  Malformed series:  {}", summary.dropped_columns);
    }
    println!("\n✅ Done in {:?}", start.elapsed());
    println!("📁 {}", pipeline.config().cube_path.display());

    Ok(())
}
