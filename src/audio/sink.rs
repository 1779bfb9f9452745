use crate::events::{Event, TrackIndex};
use crate::timing::SchedulerConfig;

/// One event handed to the instrument backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispatch {
    pub track: TrackIndex,
    /// Frame offset inside the current buffer where the event takes effect.
    pub offset: u32,
    pub event: Event,
    /// Track gain at dispatch time, after any volume event was applied.
    pub volume: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("instrument backend rejected event for {0}")]
pub struct BackendError(pub TrackIndex);

/// Instrument-side consumer of a render pull. Called on the render thread,
/// so implementations must not block or allocate.
pub trait RenderSink {
    fn deliver(&mut self, dispatch: &Dispatch) -> Result<(), BackendError>;

    /// All-notes-off for a track whose queue was reset.
    fn reset(&mut self, track: TrackIndex);
}

/// Collects dispatches into preallocated storage. Stays allocation free as
/// long as a pull delivers no more than the reserved capacity.
#[derive(Debug, Default)]
pub struct RenderOutput {
    dispatches: Vec<Dispatch>,
    resets: Vec<TrackIndex>,
}

impl RenderOutput {
    pub fn with_capacity(events: usize, tracks: usize) -> Self {
        Self {
            dispatches: Vec::with_capacity(events),
            resets: Vec::with_capacity(tracks),
        }
    }

    /// Room for every track delivering a full queue in one pull.
    pub fn for_config(config: &SchedulerConfig) -> Self {
        Self::with_capacity(
            config.queue_capacity.saturating_mul(config.max_tracks),
            config.max_tracks,
        )
    }

    pub fn clear(&mut self) {
        self.dispatches.clear();
        self.resets.clear();
    }

    pub fn dispatches(&self) -> &[Dispatch] {
        &self.dispatches
    }

    pub fn for_track(&self, track: TrackIndex) -> impl Iterator<Item = &Dispatch> + '_ {
        self.dispatches.iter().filter(move |d| d.track == track)
    }

    pub fn resets(&self) -> &[TrackIndex] {
        &self.resets
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty() && self.resets.is_empty()
    }
}

impl RenderSink for RenderOutput {
    fn deliver(&mut self, dispatch: &Dispatch) -> Result<(), BackendError> {
        self.dispatches.push(*dispatch);
        Ok(())
    }

    fn reset(&mut self, track: TrackIndex) {
        self.resets.push(track);
    }
}
