//! Configuration system for the Warden session service.
//!
//! Provides TOML-based configuration with:
//! - `[session]` lifetime, single-login, sweep and codec settings
//! - an optional `[identity]` provider fallback
//! - `[auth]` header scheme and query parameter names
//! - `[server]` and `[logging]` settings for the binary
//! - config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
