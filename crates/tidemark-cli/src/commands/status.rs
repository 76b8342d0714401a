use std::path::Path;

use anyhow::{Context, Result};

use tidemark_engine::config::parse_run_config;
use tidemark_engine::open_store;
use tidemark_types::blob::Location;
use tidemark_types::checkpoint::Timestamp;

/// Execute the `status` command: list recent runs and outstanding failed events.
pub fn execute(config_path: &Path, location: Option<&str>, limit: u32) -> Result<()> {
    let config = parse_run_config(config_path)
        .with_context(|| format!("Failed to parse run config: {}", config_path.display()))?;

    let store = open_store(&config.store)?;

    let runs = store.recent_runs(limit)?;
    if runs.is_empty() {
        println!("No recorded runs.");
    } else {
        println!("Recent runs:");
        for run in &runs {
            let finished = run.finished_at.as_ref().map_or("-", Timestamp::as_str);
            println!(
                "  #{} {} {} started {} finished {} ({} delivered, {} failed)",
                run.attempt,
                run.run_id,
                run.status,
                run.started_at,
                finished,
                run.stats.events_delivered,
                run.stats.events_failed,
            );
            if let Some(message) = &run.stats.error_message {
                println!("      {}", message);
            }
        }
    }

    let location = location.map(Location::new);
    if let Some(location) = &location {
        let ranges = store.excluded_ranges(location)?;
        if ranges.is_empty() {
            println!("\nNo processed ranges for {}.", location);
        } else {
            println!("\nProcessed ranges for {}:", location);
            for range in &ranges {
                println!("  [{}, {})", range.start_position, range.end_position);
            }
        }
    }

    let failures = store.outstanding_failures(location.as_ref())?;
    if failures.is_empty() {
        println!("\nNo outstanding failed events.");
    } else {
        println!("\nOutstanding failed events:");
        for failure in &failures {
            println!(
                "  {} position {} [{}] recorded {}",
                failure.location, failure.absolute_position, failure.error_code, failure.failed_at
            );
        }
    }

    Ok(())
}
