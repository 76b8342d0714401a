//! Semantic validation for parsed run configuration values.

use anyhow::{bail, Result};

use crate::config::types::RunConfig;

/// Validate a parsed run configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// Settings values are deliberately not validated here: unparsable
/// settings fall back to their defaults at resolution time.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the run config.
pub fn validate_run_config(config: &RunConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.pipeline.trim().is_empty() {
        errors.push("Pipeline name must not be empty".to_string());
    }

    if config.source.use_ref.trim().is_empty() {
        errors.push("Source hook reference (use) must not be empty".to_string());
    }

    if config.sink.use_ref.trim().is_empty() {
        errors.push("Sink hook reference (use) must not be empty".to_string());
    }

    match config.store.backend.as_str() {
        "sqlite" | "postgres" => {}
        other => errors.push(format!(
            "Unknown store backend '{other}', expected 'sqlite' or 'postgres'"
        )),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Run config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_run_config_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
pipeline: test_pipeline
source:
  use: jsonl
  config:
    path: /tmp/in.jsonl
sink:
  use: jsonl
  config:
    path: /tmp/out.jsonl
store:
  backend: sqlite
  connection: /tmp/checkpoints.db
"#
    }

    #[test]
    fn test_valid_config_passes() {
        let config = parse_run_config_str(valid_yaml()).unwrap();
        assert!(validate_run_config(&config).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let yaml = valid_yaml().replace("\"1.0\"", "\"2.0\"");
        let config = parse_run_config_str(&yaml).unwrap();
        let err = validate_run_config(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported config version"));
    }

    #[test]
    fn test_empty_pipeline_name_fails() {
        let yaml = valid_yaml().replace("test_pipeline", "\"\"");
        let config = parse_run_config_str(&yaml).unwrap();
        let err = validate_run_config(&config).unwrap_err().to_string();
        assert!(err.contains("Pipeline name must not be empty"));
    }

    #[test]
    fn test_empty_source_ref_fails() {
        let yaml = valid_yaml().replace("use: jsonl", "use: \"\"");
        let config = parse_run_config_str(&yaml).unwrap();
        let err = validate_run_config(&config).unwrap_err().to_string();
        assert!(err.contains("Source hook reference"));
    }

    #[test]
    fn test_unknown_backend_fails() {
        let yaml = valid_yaml().replace("backend: sqlite", "backend: dynamodb");
        let config = parse_run_config_str(&yaml).unwrap();
        let err = validate_run_config(&config).unwrap_err().to_string();
        assert!(err.contains("Unknown store backend 'dynamodb'"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let yaml = valid_yaml()
            .replace("\"1.0\"", "\"2.0\"")
            .replace("backend: sqlite", "backend: dynamodb");
        let config = parse_run_config_str(&yaml).unwrap();
        let err = validate_run_config(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported config version"));
        assert!(err.contains("Unknown store backend"));
    }
}
