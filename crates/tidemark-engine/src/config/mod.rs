//! Run configuration: YAML schema, parsing, and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_run_config, parse_run_config_str};
pub use types::{HookConfig, RunConfig, StoreConfig};
pub use validator::validate_run_config;
