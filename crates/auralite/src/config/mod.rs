//! Persisted engine configuration.
//!
//! `AudioEngineConfig` is the only state this crate persists across runs:
//! output device and buffer-size preferences, plus default spatialisation
//! parameters applied to a newly created context.

mod io;
mod paths;

pub use io::{load_config, save_config, ConfigError};
pub use paths::{default_config_dir, default_config_path};

use serde::{Deserialize, Serialize};

use crate::spatial::DistanceModel;

/// Preferred output buffer size, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferSizePreference {
    /// Let the host decide.
    Default,
    /// Request exactly this many frames (may be adjusted by the device).
    Fixed(u32),
    /// Use the smallest size known to run stably.
    LowLatency,
}

impl Default for BufferSizePreference {
    fn default() -> Self {
        Self::Default
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioEngineConfig {
    /// Output device name (`None` = system default).
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default)]
    pub buffer_size: BufferSizePreference,
    /// Preferred sample rate (`None` = device default).
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub default_distance_model: DistanceModel,
    #[serde(default = "default_doppler_factor")]
    pub doppler_factor: f32,
    #[serde(default = "default_speed_of_sound")]
    pub speed_of_sound: f32,
}

fn default_doppler_factor() -> f32 {
    1.0
}

fn default_speed_of_sound() -> f32 {
    343.3
}

impl Default for AudioEngineConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            buffer_size: BufferSizePreference::default(),
            sample_rate: None,
            default_distance_model: DistanceModel::default(),
            doppler_factor: default_doppler_factor(),
            speed_of_sound: default_speed_of_sound(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_inverse_clamped_style_defaults() {
        let cfg = AudioEngineConfig::default();
        assert_eq!(cfg.doppler_factor, 1.0);
        assert!((cfg.speed_of_sound - 343.3).abs() < 1e-6);
    }

    #[test]
    fn roundtrips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let cfg = AudioEngineConfig { output_device: Some("Speakers".to_string()), ..Default::default() };
        save_config(&cfg, &path).unwrap();
        let loaded: AudioEngineConfig = load_config(&path);
        assert_eq!(loaded.output_device, Some("Speakers".to_string()));
    }
}
