//! Service Configuration Module
//!
//! Provides the service configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `POLICITY_CONFIG` environment variable (path to TOML file)
//! 2. `policity.toml` in the current working directory
//! 3. Built-in defaults
//!
//! `POLICITY_BIND_ADDRESS` and `POLICITY_DATA_DIR` override the loaded values.
//! Secrets (`GOOGLE_API_KEY`) are only ever read from the environment.
//!
//! The loaded [`ServiceConfig`] is passed explicitly to whatever needs it;
//! there is no process-global configuration.

mod service_config;
pub mod defaults;

pub use service_config::*;
