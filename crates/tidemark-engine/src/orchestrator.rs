//! Pipeline orchestrator: builds hooks, opens the checkpoint store, and
//! drives the retry and normal phases of a run.
//!
//! Phase order is fixed: optional retention sweep, then replay of
//! outstanding failures, then new data from the source. Blobs are
//! processed strictly one at a time so that every checkpoint write
//! reflects a finished delivery attempt.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use tidemark_state::{CheckpointStore, PostgresCheckpointStore, SqliteCheckpointStore};
use tidemark_types::blob::{Blob, Location};
use tidemark_types::checkpoint::ProcessedRange;
use tidemark_types::run::{RunId, RunStats, RunStatus};

use crate::config::types::{RunConfig, StoreConfig};
use crate::errors::PipelineError;
use crate::hooks::{dispatch_send, HookRegistry, SinkHook, SourceHook};
use crate::result::{CheckReport, CheckStatus, RunReport};
use crate::settings::RunSettings;
use crate::sweeper;

/// Per-invocation options layered on top of the run config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Settings overlaid on the config's `settings` map before
    /// resolution. CLI `--set key=value` pairs land here.
    pub overrides: BTreeMap<String, String>,
}

/// Open the checkpoint store named by the config.
///
/// # Errors
///
/// Returns an error if `connection` is missing or the backend cannot be
/// opened.
pub fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn CheckpointStore>> {
    let connection = config
        .connection
        .as_deref()
        .context("store.connection is required")?;
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteCheckpointStore::open(Path::new(connection))?)),
        "postgres" => Ok(Arc::new(PostgresCheckpointStore::open(connection)?)),
        other => anyhow::bail!("unknown store backend '{other}'"),
    }
}

fn resolve_settings(config: &RunConfig, options: &RunOptions) -> RunSettings {
    let mut values = config.settings.clone();
    values.extend(options.overrides.clone());
    RunSettings::new(config.pipeline.clone(), values)
}

fn mode_label(settings: &RunSettings) -> &'static str {
    match (settings.is_retry(), settings.is_run()) {
        (true, true) => "retry+normal",
        (true, false) => "retry",
        (false, true) => "normal",
        (false, false) => "none",
    }
}

/// Run options that must hold before any blob is processed.
fn validate_settings(config: &RunConfig, settings: &RunSettings) -> Result<(), PipelineError> {
    if settings.enable_monitoring() && config.store.connection.is_none() {
        return Err(PipelineError::config(
            "monitoring is enabled but store.connection is not set",
        ));
    }
    if settings.is_retry() && !settings.enable_monitoring() {
        return Err(PipelineError::config(
            "the retry phase needs monitoring; set is_retry=false or enable monitoring",
        ));
    }
    Ok(())
}

/// Execute one pipeline run.
///
/// # Errors
///
/// Fails on invalid run options, checkpoint store errors, and source
/// failures. Delivery failures never fail the run; they are recorded as
/// failed events for a later retry run.
pub async fn run_pipeline(
    config: &RunConfig,
    registry: &HookRegistry,
    options: &RunOptions,
) -> Result<RunReport, PipelineError> {
    let start = Instant::now();
    let run_id = RunId::new(config.pipeline.clone());
    let settings = resolve_settings(config, options);
    let mode = mode_label(&settings);

    if !settings.is_retry() && !settings.is_run() {
        tracing::warn!(run = run_id.as_str(), "Both phases disabled; nothing to do");
        return Ok(RunReport {
            run_id: run_id.to_string(),
            mode: mode.to_string(),
            stats: RunStats::default(),
            pruned: None,
            reports: None,
            duration_secs: start.elapsed().as_secs_f64(),
        });
    }

    validate_settings(config, &settings)?;
    tracing::info!(
        run = run_id.as_str(),
        mode,
        monitoring = settings.enable_monitoring(),
        "Starting pipeline run"
    );

    let store: Option<Arc<dyn CheckpointStore>> = if settings.enable_monitoring() {
        let store_config = config.store.clone();
        let store = tokio::task::spawn_blocking(move || open_store(&store_config))
            .await
            .map_err(|e| {
                PipelineError::Infrastructure(anyhow::anyhow!("open_store task panicked: {e}"))
            })?
            .map_err(PipelineError::Infrastructure)?;
        Some(store)
    } else {
        None
    };

    let mut source = registry
        .build_source(&config.source.use_ref, &config.source.config)
        .map_err(|e| PipelineError::config(format!("source hook: {e:#}")))?;
    let mut sink = registry
        .build_sink(&config.sink.use_ref, &config.sink.config)
        .map_err(|e| PipelineError::config(format!("sink hook: {e:#}")))?;

    let attempt = match &store {
        Some(store) => Some(start_run(store, &run_id, mode).await?),
        None => None,
    };

    let pruned = match (&store, settings.enable_cleanup()) {
        (Some(store), true) => {
            sweeper::sweep_before_run(Arc::clone(store), settings.days_to_live()).await
        }
        _ => None,
    };

    let mut stats = RunStats::default();
    let mut reports: Option<Vec<serde_json::Value>> = settings.return_report().then(Vec::new);

    let outcome = execute_phases(
        &settings,
        store.as_ref(),
        source.as_mut(),
        sink.as_mut(),
        &mut stats,
        &mut reports,
    )
    .await;

    match outcome {
        Ok(()) => {
            if let (Some(store), Some(attempt)) = (&store, attempt) {
                complete_run(store, attempt, RunStatus::Completed, &stats).await?;
            }
            let duration_secs = start.elapsed().as_secs_f64();
            tracing::info!(
                run = run_id.as_str(),
                blobs = stats.blobs_processed,
                delivered = stats.events_delivered,
                failed = stats.events_failed,
                duration_secs,
                "Pipeline run completed"
            );
            Ok(RunReport {
                run_id: run_id.to_string(),
                mode: mode.to_string(),
                stats,
                pruned,
                reports,
                duration_secs,
            })
        }
        Err(err) => {
            if let (Some(store), Some(attempt)) = (&store, attempt) {
                let mut failed_stats = stats.clone();
                failed_stats.error_message = Some(err.to_string());
                if let Err(finalize_err) =
                    complete_run(store, attempt, RunStatus::Failed, &failed_stats).await
                {
                    tracing::error!(error = %finalize_err, "Failed to record run failure");
                }
            }
            tracing::error!(run = run_id.as_str(), error = %err, "Pipeline run failed");
            Err(err)
        }
    }
}

async fn execute_phases(
    settings: &RunSettings,
    store: Option<&Arc<dyn CheckpointStore>>,
    source: &mut dyn SourceHook,
    sink: &mut dyn SinkHook,
    stats: &mut RunStats,
    reports: &mut Option<Vec<serde_json::Value>>,
) -> Result<(), PipelineError> {
    if settings.is_retry() {
        // validate_settings guarantees a store in retry mode
        if let Some(store) = store {
            let blobs = replay_failed(store).await?;
            tracing::info!(
                blobs = blobs.len(),
                "Retry phase: replaying outstanding failures"
            );
            for mut blob in blobs {
                process_blob(&mut blob, sink, Some(store), stats, reports).await?;
            }
        }
    }

    if settings.is_run() {
        let excluded = match store {
            Some(store) => excluded_ranges(store, source.location()).await?,
            None => Vec::new(),
        };
        tracing::debug!(
            location = source.location().as_str(),
            excluded = excluded.len(),
            "Normal phase: opening source"
        );
        source
            .open(&excluded)
            .await
            .map_err(|e| PipelineError::Infrastructure(e.context("opening source")))?;

        while let Some(mut blob) = source
            .next_blob()
            .await
            .map_err(|e| PipelineError::Infrastructure(e.context("reading from source")))?
        {
            process_blob(&mut blob, sink, store, stats, reports).await?;
        }
    }

    Ok(())
}

/// Deliver one blob and record its outcome.
///
/// The store write happens after the delivery attempt and covers both
/// the processed range and any failed events in one transaction.
async fn process_blob(
    blob: &mut Blob,
    sink: &mut dyn SinkHook,
    store: Option<&Arc<dyn CheckpointStore>>,
    stats: &mut RunStats,
    reports: &mut Option<Vec<serde_json::Value>>,
) -> Result<(), PipelineError> {
    if blob.is_empty() {
        tracing::debug!(
            location = blob.location().as_str(),
            position = blob.position(),
            "Skipping empty blob"
        );
        return Ok(());
    }

    dispatch_send(sink, blob).await;

    if let Some(store) = store {
        record_outcome(store, blob).await?;
    }

    let total = u64::try_from(blob.num_rows()).unwrap_or_default();
    let delivered = blob.delivered_positions().len() as u64;
    stats.blobs_processed += 1;
    stats.events_delivered += delivered;
    stats.events_failed += total.saturating_sub(delivered);

    if let Some(reports) = reports.as_mut() {
        reports.extend(blob.reports().iter().cloned());
    }
    Ok(())
}

/// Probe the source, sink, and checkpoint store without moving data.
///
/// # Errors
///
/// Fails only on runtime task failures; per-component problems are
/// reported in the returned [`CheckReport`].
pub async fn check_pipeline(
    config: &RunConfig,
    registry: &HookRegistry,
    options: &RunOptions,
) -> Result<CheckReport, PipelineError> {
    let settings = resolve_settings(config, options);

    let store = if settings.enable_monitoring() {
        let store_config = config.store.clone();
        let result = tokio::task::spawn_blocking(move || open_store(&store_config))
            .await
            .map_err(|e| {
                PipelineError::Infrastructure(anyhow::anyhow!("open_store task panicked: {e}"))
            })?;
        match result {
            Ok(_) => CheckStatus::passed(format!("{} store reachable", config.store.backend)),
            Err(e) => CheckStatus::failed(format!("{e:#}")),
        }
    } else {
        CheckStatus::passed("monitoring disabled; store not checked")
    };

    let source = match registry.build_source(&config.source.use_ref, &config.source.config) {
        Ok(source) => match source.check().await {
            Ok(()) => CheckStatus::passed(format!("source '{}' ready", config.source.use_ref)),
            Err(e) => CheckStatus::failed(format!("{e:#}")),
        },
        Err(e) => CheckStatus::failed(format!("{e:#}")),
    };

    let sink = match registry.build_sink(&config.sink.use_ref, &config.sink.config) {
        Ok(sink) => match sink.check().await {
            Ok(()) => CheckStatus::passed(format!("sink '{}' ready", config.sink.use_ref)),
            Err(e) => CheckStatus::failed(format!("{e:#}")),
        },
        Err(e) => CheckStatus::failed(format!("{e:#}")),
    };

    Ok(CheckReport {
        source,
        sink,
        store,
    })
}

async fn excluded_ranges(
    store: &Arc<dyn CheckpointStore>,
    location: &Location,
) -> Result<Vec<ProcessedRange>, PipelineError> {
    let store = Arc::clone(store);
    let location = location.clone();
    tokio::task::spawn_blocking(move || store.excluded_ranges(&location))
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("excluded_ranges task panicked: {e}"))
        })?
        .map_err(PipelineError::State)
}

async fn replay_failed(store: &Arc<dyn CheckpointStore>) -> Result<Vec<Blob>, PipelineError> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.replay_failed())
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("replay_failed task panicked: {e}"))
        })?
        .map_err(PipelineError::State)
}

async fn record_outcome(
    store: &Arc<dyn CheckpointStore>,
    blob: &Blob,
) -> Result<(), PipelineError> {
    let store = Arc::clone(store);
    let blob = blob.clone();
    tokio::task::spawn_blocking(move || store.record_outcome(&blob))
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("record_outcome task panicked: {e}"))
        })?
        .map_err(PipelineError::State)
}

async fn start_run(
    store: &Arc<dyn CheckpointStore>,
    run_id: &RunId,
    mode: &str,
) -> Result<i64, PipelineError> {
    let store = Arc::clone(store);
    let run_id = run_id.clone();
    let mode = mode.to_string();
    tokio::task::spawn_blocking(move || store.start_run(&run_id, &mode))
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("start_run task panicked: {e}"))
        })?
        .map_err(PipelineError::State)
}

async fn complete_run(
    store: &Arc<dyn CheckpointStore>,
    attempt: i64,
    status: RunStatus,
    stats: &RunStats,
) -> Result<(), PipelineError> {
    let store = Arc::clone(store);
    let stats = stats.clone();
    tokio::task::spawn_blocking(move || store.complete_run(attempt, status, &stats))
        .await
        .map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("complete_run task panicked: {e}"))
        })?
        .map_err(PipelineError::State)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::HookConfig;
    use crate::hooks::memory::MemorySink;

    fn base_config() -> RunConfig {
        RunConfig {
            version: "1.0".to_string(),
            pipeline: "orders".to_string(),
            source: HookConfig {
                use_ref: "memory".to_string(),
                config: serde_json::Value::Null,
            },
            sink: HookConfig {
                use_ref: "memory".to_string(),
                config: serde_json::Value::Null,
            },
            store: StoreConfig {
                backend: "sqlite".to_string(),
                connection: Some("/tmp/cp.db".to_string()),
            },
            settings: BTreeMap::new(),
        }
    }

    fn settings_with(config: &RunConfig, pairs: &[(&str, &str)]) -> RunSettings {
        let mut config = config.clone();
        for (k, v) in pairs {
            config.settings.insert((*k).to_string(), (*v).to_string());
        }
        resolve_settings(&config, &RunOptions::default())
    }

    #[test]
    fn test_mode_label() {
        let config = base_config();
        assert_eq!(mode_label(&settings_with(&config, &[])), "retry+normal");
        assert_eq!(
            mode_label(&settings_with(&config, &[("is_run", "false")])),
            "retry"
        );
        assert_eq!(
            mode_label(&settings_with(&config, &[("is_retry", "false")])),
            "normal"
        );
        assert_eq!(
            mode_label(&settings_with(
                &config,
                &[("is_retry", "false"), ("is_run", "false")]
            )),
            "none"
        );
    }

    #[test]
    fn test_overrides_win_over_config_settings() {
        let mut config = base_config();
        config
            .settings
            .insert("is_retry".to_string(), "true".to_string());
        let mut options = RunOptions::default();
        options
            .overrides
            .insert("is_retry".to_string(), "false".to_string());
        let settings = resolve_settings(&config, &options);
        assert!(!settings.is_retry());
    }

    #[test]
    fn test_monitoring_without_connection_is_a_config_error() {
        let mut config = base_config();
        config.store.connection = None;
        let settings = settings_with(&config, &[]);
        let err = validate_settings(&config, &settings).unwrap_err();
        assert!(err.to_string().contains("store.connection"));
    }

    #[test]
    fn test_retry_without_monitoring_is_a_config_error() {
        let config = base_config();
        let settings = settings_with(&config, &[("enable_monitoring", "false")]);
        let err = validate_settings(&config, &settings).unwrap_err();
        assert!(err.to_string().contains("retry phase"));
    }

    #[test]
    fn test_monitoring_disabled_without_connection_is_fine() {
        let mut config = base_config();
        config.store.connection = None;
        let settings = settings_with(
            &config,
            &[("enable_monitoring", "false"), ("is_retry", "false")],
        );
        assert!(validate_settings(&config, &settings).is_ok());
    }

    #[tokio::test]
    async fn test_empty_blob_is_skipped() {
        let mut sink = MemorySink::new();
        let log = sink.log();
        let mut blob = Blob::new("L", Vec::new());
        let mut stats = RunStats::default();
        let mut reports = None;

        process_blob(&mut blob, &mut sink, None, &mut stats, &mut reports)
            .await
            .unwrap();

        assert_eq!(stats.blobs_processed, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_open_store_requires_connection() {
        let err = open_store(&StoreConfig {
            backend: "sqlite".to_string(),
            connection: None,
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("store.connection"));
    }
}
