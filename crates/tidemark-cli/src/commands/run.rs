use std::path::Path;

use anyhow::{Context, Result};

use tidemark_engine::config::{parse_run_config, validate_run_config};
use tidemark_engine::{run_pipeline, HookRegistry, RunOptions};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(config_path: &Path, overrides: &[String]) -> Result<()> {
    // 1. Parse run config YAML
    let config = parse_run_config(config_path)
        .with_context(|| format!("Failed to parse run config: {}", config_path.display()))?;

    // 2. Validate
    validate_run_config(&config)?;
    let options = parse_overrides(overrides)?;

    tracing::info!(
        pipeline = config.pipeline,
        source = config.source.use_ref,
        sink = config.sink.use_ref,
        "Run config validated"
    );

    // 3. Run
    let registry = HookRegistry::builtin();
    let report = run_pipeline(&config, &registry, &options).await?;

    println!("Pipeline '{}' completed successfully.", config.pipeline);
    println!("  Mode:             {}", report.mode);
    println!("  Blobs processed:  {}", report.stats.blobs_processed);
    println!("  Events delivered: {}", report.stats.events_delivered);
    println!("  Events failed:    {}", report.stats.events_failed);
    if let Some(pruned) = report.pruned {
        println!(
            "  Swept:            {} range(s), {} failure(s)",
            pruned.ranges_removed, pruned.failures_removed
        );
    }
    println!("  Duration:         {:.2}s", report.duration_secs);
    if report.stats.events_failed > 0 {
        println!(
            "{} event(s) could not be delivered; they are recorded for the next retry run.",
            report.stats.events_failed
        );
    }

    // Machine-readable sink acknowledgments for downstream tooling
    if let Some(reports) = &report.reports {
        for sink_report in reports {
            println!("@@SINK_REPORT@@{}", sink_report);
        }
    }

    Ok(())
}

fn parse_overrides(overrides: &[String]) -> Result<RunOptions> {
    let mut options = RunOptions::default();
    for pair in overrides {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid --set value '{pair}': expected KEY=VALUE"))?;
        options
            .overrides
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(options)
}
