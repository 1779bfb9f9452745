use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An instrument already resolved by the bridge layer. The scheduler never
/// decodes these; it only hands them to an [`InstrumentLoader`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrumentHandle {
    Sfz {
        path: PathBuf,
        tuning_path: Option<PathBuf>,
    },
    SfzString {
        sample_root: PathBuf,
        sfz: String,
        tuning: Option<String>,
    },
    Sf2 {
        path: PathBuf,
        is_asset: bool,
        preset_index: i32,
    },
    AudioUnit {
        id: String,
    },
    /// Backend-defined in-memory instrument, nothing to load.
    Builtin {
        name: String,
    },
}

impl InstrumentHandle {
    pub fn describe(&self) -> String {
        match self {
            InstrumentHandle::Sfz { path, .. } => format!("sfz {}", path.display()),
            InstrumentHandle::SfzString { sample_root, .. } => {
                format!("sfz string rooted at {}", sample_root.display())
            }
            InstrumentHandle::Sf2 {
                path, preset_index, ..
            } => format!("sf2 {} preset {}", path.display(), preset_index),
            InstrumentHandle::AudioUnit { id } => format!("audio unit {}", id),
            InstrumentHandle::Builtin { name } => format!("builtin {}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InstrumentLoadError {
    #[error("{0} not found")]
    Missing(PathBuf),

    #[error("unsupported instrument: {0}")]
    Unsupported(String),

    #[error("invalid instrument: {0}")]
    Invalid(String),
}

/// Prepares the backing resources of an instrument. May block on I/O; it is
/// only ever called from the engine's control thread.
pub trait InstrumentLoader: Send + 'static {
    fn load(&mut self, instrument: &InstrumentHandle) -> Result<(), InstrumentLoadError>;
}

/// Checks that file-backed instruments exist. Platform audio units need a
/// host and are refused.
#[derive(Debug, Default, Clone)]
pub struct PathLoader;

impl InstrumentLoader for PathLoader {
    fn load(&mut self, instrument: &InstrumentHandle) -> Result<(), InstrumentLoadError> {
        match instrument {
            InstrumentHandle::Sfz { path, tuning_path } => {
                require_file(path)?;
                if let Some(tuning) = tuning_path {
                    require_file(tuning)?;
                }
                Ok(())
            }
            InstrumentHandle::SfzString {
                sample_root, sfz, ..
            } => {
                if !sample_root.is_dir() {
                    return Err(InstrumentLoadError::Missing(sample_root.clone()));
                }
                if sfz.trim().is_empty() {
                    return Err(InstrumentLoadError::Invalid("empty sfz definition".into()));
                }
                Ok(())
            }
            InstrumentHandle::Sf2 {
                path, preset_index, ..
            } => {
                if *preset_index < 0 {
                    return Err(InstrumentLoadError::Invalid(format!(
                        "negative preset index {}",
                        preset_index
                    )));
                }
                require_file(path)
            }
            InstrumentHandle::AudioUnit { id } => Err(InstrumentLoadError::Unsupported(
                format!("no audio unit host for {}", id),
            )),
            InstrumentHandle::Builtin { .. } => Ok(()),
        }
    }
}

fn require_file(path: &Path) -> Result<(), InstrumentLoadError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(InstrumentLoadError::Missing(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_always_loads() {
        let handle = InstrumentHandle::Builtin {
            name: "sine".into(),
        };
        assert!(PathLoader.load(&handle).is_ok());
    }

    #[test]
    fn missing_sfz_file_fails() {
        let path = std::env::temp_dir().join("trackseq-does-not-exist.sfz");
        let handle = InstrumentHandle::Sfz {
            path: path.clone(),
            tuning_path: None,
        };
        assert_eq!(
            PathLoader.load(&handle),
            Err(InstrumentLoadError::Missing(path))
        );
    }

    #[test]
    fn existing_sfz_file_loads() {
        let path = std::env::temp_dir().join(format!("trackseq-{}.sfz", std::process::id()));
        std::fs::write(&path, "<region> sample=a.wav").unwrap();
        let handle = InstrumentHandle::Sfz {
            path: path.clone(),
            tuning_path: None,
        };
        assert!(PathLoader.load(&handle).is_ok());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn sfz_string_needs_root_and_body() {
        let root = std::env::temp_dir();
        let empty = InstrumentHandle::SfzString {
            sample_root: root.clone(),
            sfz: "  ".into(),
            tuning: None,
        };
        assert!(matches!(
            PathLoader.load(&empty),
            Err(InstrumentLoadError::Invalid(_))
        ));

        let ok = InstrumentHandle::SfzString {
            sample_root: root,
            sfz: "<region> sample=a.wav".into(),
            tuning: None,
        };
        assert!(PathLoader.load(&ok).is_ok());
    }

    #[test]
    fn audio_units_are_unsupported() {
        let handle = InstrumentHandle::AudioUnit { id: "aumu,dls ,appl".into() };
        assert!(matches!(
            PathLoader.load(&handle),
            Err(InstrumentLoadError::Unsupported(_))
        ));
    }
}
