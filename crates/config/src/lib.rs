//! Configuration loading, validation, and env substitution.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then `~/.config/courier/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        config_dir, data_dir, discover_and_load, load_config, set_config_dir, set_data_dir,
        substitute_env,
    },
    schema::{
        AgentConfig, CourierConfig, DispatchConfig, MediaConfig, MetricsConfig, StoreConfig,
        WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
