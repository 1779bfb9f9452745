mod instrument;
mod sink;
mod track;

pub use instrument::{InstrumentHandle, InstrumentLoadError, InstrumentLoader, PathLoader};
pub use sink::{BackendError, Dispatch, RenderOutput, RenderSink};
pub use track::{Track, TrackRenderState, TrackShared, new_track};
