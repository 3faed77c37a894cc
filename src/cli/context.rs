use std::path::{Path, PathBuf};

use crate::config::RunnerConfig;

/// Effective configuration (file plus environment overrides) and where the
/// file lives.
pub struct CliContext {
    config: RunnerConfig,
    config_path: PathBuf,
}

impl CliContext {
    pub fn new(config: RunnerConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
