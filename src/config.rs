use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{
    audio::InstrumentHandle,
    error::ConfigError,
    timing::{MAX_QUEUE_CAPACITY, SchedulerConfig},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per render pull when the engine drives its own clock.
    pub buffer_size: u32,
    pub queue_capacity: usize,
    pub max_tracks: usize,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Instruments loaded as tracks at startup, in index order.
    pub tracks: Vec<InstrumentHandle>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            sample_rate: scheduler.sample_rate,
            buffer_size: 512,
            queue_capacity: scheduler.queue_capacity,
            max_tracks: scheduler.max_tracks,
            log_filter: "info".to_string(),
            tracks: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: EngineConfig =
            ron::from_str(&ron_string).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive"));
        }
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::Invalid("queue_capacity out of range"));
        }
        if self.max_tracks == 0 || self.max_tracks > u32::MAX as usize {
            return Err(ConfigError::Invalid("max_tracks out of range"));
        }
        if self.tracks.len() > self.max_tracks {
            return Err(ConfigError::Invalid("more preloaded tracks than max_tracks"));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            sample_rate: self.sample_rate,
            queue_capacity: self.queue_capacity,
            max_tracks: self.max_tracks,
        }
    }

    /// Wall-clock length of one render pull.
    pub fn buffer_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.buffer_size as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("trackseq-config-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler_config(), SchedulerConfig::default());
    }

    #[test]
    fn save_then_load() {
        let path = temp_path("engine.ron");
        let config = EngineConfig {
            sample_rate: 48_000,
            tracks: vec![InstrumentHandle::Sf2 {
                path: "piano.sf2".into(),
                is_asset: true,
                preset_index: 3,
            }],
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_fields_take_defaults() {
        let path = temp_path("partial.ron");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "(sample_rate: 96000, max_tracks: 8)").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.sample_rate, 96_000);
        assert_eq!(config.max_tracks, 8);
        assert_eq!(config.queue_capacity, 8192);
        assert_eq!(config.log_filter, "info");
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn rejects_invalid_values() {
        let path = temp_path("invalid.ron");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "(queue_capacity: 0)").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        let oversized = EngineConfig {
            queue_capacity: usize::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(oversized.validate(), Err(ConfigError::Invalid(_))));
        let largest = EngineConfig {
            queue_capacity: MAX_QUEUE_CAPACITY,
            ..EngineConfig::default()
        };
        assert!(largest.validate().is_ok());

        fs::write(&path, "(sample_rate: \"fast\")").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse(_))));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            EngineConfig::load(&temp_path("nope.ron")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn buffer_duration_follows_rate() {
        let config = EngineConfig {
            sample_rate: 48_000,
            buffer_size: 480,
            ..EngineConfig::default()
        };
        assert_eq!(config.buffer_duration(), std::time::Duration::from_millis(10));
    }
}
