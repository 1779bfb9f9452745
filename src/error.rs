use crate::audio::InstrumentLoadError;
use crate::events::TrackIndex;
use crate::wire::DecodeError;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("{0} does not exist or was removed")]
    TrackNotFound(TrackIndex),

    #[error("malformed event data: {0}")]
    MalformedEventData(#[from] DecodeError),

    #[error("event queue is full ({accepted} of {requested} accepted)")]
    QueueCapacityExceeded { accepted: usize, requested: usize },

    #[error("failed to load instrument: {0}")]
    InstrumentLoadFailure(#[from] InstrumentLoadError),

    #[error("all {0} track slots are in use")]
    TrackLimitReached(usize),

    #[error("renderer has not consumed pending track changes")]
    RenderBacklog,

    #[error("volume must be finite, got {0}")]
    InvalidVolume(f32),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Parse(String),

    #[error("config serialize: {0}")]
    Serialize(String),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}
