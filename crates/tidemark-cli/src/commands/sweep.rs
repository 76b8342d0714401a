use std::path::Path;

use anyhow::{Context, Result};

use tidemark_engine::config::parse_run_config;
use tidemark_engine::sweeper::prune_expired;
use tidemark_engine::{open_store, RunSettings};

/// Execute the `sweep` command: prune checkpoint rows past the retention horizon.
pub fn execute(config_path: &Path, days: Option<i64>) -> Result<()> {
    let config = parse_run_config(config_path)
        .with_context(|| format!("Failed to parse run config: {}", config_path.display()))?;

    let settings = RunSettings::new(config.pipeline.clone(), config.settings.clone());
    let days_to_live = days.unwrap_or_else(|| settings.days_to_live());
    if days_to_live < 0 {
        anyhow::bail!("Retention horizon must be non-negative, got {days_to_live}");
    }

    let store = open_store(&config.store)?;
    let stats = prune_expired(store.as_ref(), days_to_live)?;

    println!(
        "Removed {} processed range(s) and {} failed event record(s) older than {} day(s).",
        stats.ranges_removed, stats.failures_removed, days_to_live
    );

    Ok(())
}
