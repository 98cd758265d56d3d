//! Path utilities for the engine's persisted configuration file.

use std::path::PathBuf;

/// Directory holding auralite's configuration, following XDG/platform
/// conventions via `dirs`.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("auralite")
}

/// Full path to the persisted `AudioEngineConfig` file.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_ends_with_auralite() {
        assert!(default_config_dir().ends_with("auralite"));
    }

    #[test]
    fn config_path_ends_with_yaml_file() {
        assert!(default_config_path().ends_with("config.yaml"));
    }
}
