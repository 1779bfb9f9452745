//! Real-time multi-track event scheduler.
//!
//! A control thread submits timed events per track through a [`Scheduler`];
//! the audio thread calls [`Renderer::render_pull`] once per buffer and
//! receives every event due in that buffer, at its frame offset, through a
//! [`RenderSink`].

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod timing;
pub mod wire;

pub use audio::{
    BackendError, Dispatch, InstrumentHandle, InstrumentLoadError, InstrumentLoader, PathLoader,
    RenderOutput, RenderSink,
};
pub use config::EngineConfig;
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, RequestId, spawn_engine};
pub use error::{ConfigError, SchedulerError};
pub use events::{Event, EventPayload, EventTime, Frame, TrackIndex};
pub use timing::{RenderStats, Renderer, Scheduler, SchedulerConfig, TransportState};
