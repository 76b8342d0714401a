use std::path::Path;

use anyhow::{Context, Result};

use tidemark_engine::config::{parse_run_config, validate_run_config};
use tidemark_engine::{check_pipeline, CheckStatus, HookRegistry, RunOptions};

/// Execute the `check` command: validate run config and probe connectivity.
pub async fn execute(config_path: &Path) -> Result<()> {
    // 1. Parse run config YAML
    let config = parse_run_config(config_path)
        .with_context(|| format!("Failed to parse run config: {}", config_path.display()))?;

    // 2. Validate structure
    validate_run_config(&config)?;
    println!("Config structure: OK");

    // 3. Probe hooks and store
    let registry = HookRegistry::builtin();
    let report = check_pipeline(&config, &registry, &RunOptions::default()).await?;

    print_status("Source", &report.source);
    print_status("Sink", &report.sink);
    print_status("Store", &report.store);

    if report.all_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_status(label: &str, status: &CheckStatus) {
    let state = if status.ok { "OK" } else { "FAILED" };
    println!("{:18} {}", format!("{}:", label), state);
    if !status.message.is_empty() {
        println!("  {}", status.message);
    }
}
