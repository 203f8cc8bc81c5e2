//! CLI command handlers.

pub mod check;
pub mod serve;

use anyhow::{Context as _, Result};
use warden_config::WardenConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<std::path::PathBuf>,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the effective configuration and describe where it came from.
    pub fn load_config(&self) -> Result<(WardenConfig, Vec<String>)> {
        match &self.config_path {
            Some(path) => {
                let config = warden_config::load_config_file(path)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
                Ok((config, vec![path.display().to_string()]))
            }
            None => {
                let loaded = warden_config::load_config(None)?;
                let sources = loaded
                    .loaded_from()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                Ok((loaded.config, sources))
            }
        }
    }
}
