use super::InstrumentHandle;
use crate::events::TrackIndex;
use crate::timing::{QueueConsumer, QueueProducer, event_queue};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

/// Track state readable from both threads without locking.
pub struct TrackShared {
    pub index: TrackIndex,
    volume: AtomicU32,
    active: AtomicBool,
    skipped_pulls: AtomicU64,
}

impl TrackShared {
    fn new(index: TrackIndex) -> Self {
        Self {
            index,
            volume: AtomicU32::new(1.0f32.to_bits()),
            active: AtomicBool::new(true),
            skipped_pulls: AtomicU64::new(0),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// The volume `value` would produce: clamped to 0.0..=1.0, or the current
    /// volume when `value` is not finite.
    pub fn resolve_volume(&self, value: f32) -> f32 {
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            self.volume()
        }
    }

    /// Stores `value` clamped to 0.0..=1.0. Non-finite values are ignored.
    pub fn set_volume(&self, value: f32) {
        if !value.is_finite() {
            return;
        }
        self.volume
            .store(self.resolve_volume(value).to_bits(), Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn skipped_pulls(&self) -> u64 {
        self.skipped_pulls.load(Ordering::Relaxed)
    }

    pub(crate) fn record_skip(&self) {
        self.skipped_pulls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Control-side half of a track.
pub struct Track {
    pub instrument: InstrumentHandle,
    pub shared: Arc<TrackShared>,
    producer: Mutex<QueueProducer>,
}

impl Track {
    pub fn index(&self) -> TrackIndex {
        self.shared.index
    }

    pub fn queue(&self) -> parking_lot::MutexGuard<'_, QueueProducer> {
        self.producer.lock()
    }
}

/// Render-side half of a track, owned by the render thread until removal.
pub struct TrackRenderState {
    pub shared: Arc<TrackShared>,
    pub queue: QueueConsumer,
}

pub fn new_track(
    index: TrackIndex,
    instrument: InstrumentHandle,
    queue_capacity: usize,
) -> (Track, TrackRenderState) {
    let shared = Arc::new(TrackShared::new(index));
    let (producer, consumer) = event_queue(queue_capacity);
    let track = Track {
        instrument,
        shared: shared.clone(),
        producer: Mutex::new(producer),
    };
    let render = TrackRenderState {
        shared,
        queue: consumer,
    };
    (track, render)
}
