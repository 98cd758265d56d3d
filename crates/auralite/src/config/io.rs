//! Generic YAML configuration I/O.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to create config directory {path}: {source}")]
    CreateDir { path: String, source: std::io::Error },
    #[error("failed to write config file {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Load configuration from a YAML file. Missing or unparsable files fall
/// back to `T::default()` (with a warning in the latter case) rather than
/// failing the caller.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::info!("loading config from {:?}", path);

    if !path.exists() {
        log::info!("config file doesn't exist, using defaults");
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("failed to parse config at {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("failed to read config at {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories as needed.
pub fn save_config<T>(config: &T, path: &Path) -> Result<(), ConfigError>
where
    T: Serialize,
{
    log::info!("saving config to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let yaml = serde_yaml::to_string(config)?;

    std::fs::write(path, yaml).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        value: i32,
        name: String,
    }

    #[test]
    fn load_nonexistent_returns_default() {
        let config: TestConfig = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(config, TestConfig::default());
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test-config.yaml");

        let config = TestConfig { value: 42, name: "test".to_string() };
        save_config(&config, &path).unwrap();
        let loaded: TestConfig = load_config(&path);

        assert_eq!(loaded, config);
    }
}
