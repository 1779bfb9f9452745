use super::{Transport, TransportState};
use crate::audio::{
    Dispatch, InstrumentHandle, RenderSink, Track, TrackRenderState, new_track,
};
use crate::error::{Result, SchedulerError};
use crate::events::{Event, EventPayload, Frame, TrackIndex};
use crate::wire;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub sample_rate: u32,
    /// Events each track can hold, in flight and pending.
    pub queue_capacity: usize,
    pub max_tracks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            queue_capacity: 8192,
            max_tracks: 64,
        }
    }
}

enum RenderCommand {
    Install(Box<TrackRenderState>),
    Remove(TrackIndex),
}

struct EngineShared {
    position: AtomicU64,
    last_render_micros: AtomicU64,
    transport: Transport,
}

type TrackTable = Vec<Option<Arc<Track>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Live,
    /// Removed on the control side, render state not yet handed back.
    Retiring,
}

struct Structure {
    commands: HeapProd<RenderCommand>,
    retired: HeapCons<Box<TrackRenderState>>,
    slots: Vec<Slot>,
}

impl Structure {
    fn reclaim(&mut self) -> usize {
        let mut reclaimed = 0;
        while let Some(state) = self.retired.try_pop() {
            let index = state.shared.index;
            if let Some(slot) = self.slots.get_mut(index.as_usize()) {
                *slot = Slot::Free;
            }
            tracing::debug!("reclaimed {}", index);
            reclaimed += 1;
        }
        reclaimed
    }
}

/// Control-side handle. Every method is safe to call from any non-real-time
/// thread while a [`Renderer`] runs on the audio thread.
pub struct Scheduler {
    config: SchedulerConfig,
    tracks: ArcSwap<TrackTable>,
    structure: Mutex<Structure>,
    shared: Arc<EngineShared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> (Scheduler, Renderer) {
        let max_tracks = config.max_tracks.max(1);
        let (commands_tx, commands_rx) = HeapRb::<RenderCommand>::new(max_tracks * 2).split();
        let (retired_tx, retired_rx) = HeapRb::<Box<TrackRenderState>>::new(max_tracks).split();
        let shared = Arc::new(EngineShared {
            position: AtomicU64::new(0),
            last_render_micros: AtomicU64::new(0),
            transport: Transport::new(),
        });

        let scheduler = Scheduler {
            config: SchedulerConfig {
                max_tracks,
                ..config
            },
            tracks: ArcSwap::from_pointee(Vec::new()),
            structure: Mutex::new(Structure {
                commands: commands_tx,
                retired: retired_rx,
                slots: vec![Slot::Free; max_tracks],
            }),
            shared: shared.clone(),
        };
        let renderer = Renderer {
            commands: commands_rx,
            retired: retired_tx,
            tracks: std::iter::repeat_with(|| None).take(max_tracks).collect(),
            shared,
        };
        (scheduler, renderer)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    // --- Track lifecycle ---

    /// Creates a track for an instrument that is already loaded. The track
    /// becomes visible to the renderer on its next pull.
    pub fn add_track(&self, instrument: InstrumentHandle) -> Result<TrackIndex> {
        let mut structure = self.structure.lock();
        structure.reclaim();

        let Some(slot) = structure.slots.iter().position(|s| *s == Slot::Free) else {
            tracing::warn!("track limit of {} reached", self.config.max_tracks);
            return Err(SchedulerError::TrackLimitReached(self.config.max_tracks));
        };
        let index = TrackIndex(slot as u32);
        let description = instrument.describe();
        let (track, render) = new_track(index, instrument, self.config.queue_capacity);

        if structure
            .commands
            .try_push(RenderCommand::Install(Box::new(render)))
            .is_err()
        {
            // Each slot has at most an Install and a Remove outstanding.
            tracing::warn!("render command ring full, cannot add {}", index);
            return Err(SchedulerError::RenderBacklog);
        }
        structure.slots[slot] = Slot::Live;

        let mut table = TrackTable::clone(&self.tracks.load());
        if table.len() <= slot {
            table.resize(slot + 1, None);
        }
        table[slot] = Some(Arc::new(track));
        self.tracks.store(Arc::new(table));

        tracing::info!("added {} ({})", index, description);
        Ok(index)
    }

    /// Returns false when `index` is unknown or already removed.
    pub fn remove_track(&self, index: TrackIndex) -> bool {
        let mut structure = self.structure.lock();
        structure.reclaim();

        let slot = index.as_usize();
        if structure.slots.get(slot) != Some(&Slot::Live) {
            tracing::debug!("remove of unknown {}", index);
            return false;
        }
        if structure
            .commands
            .try_push(RenderCommand::Remove(index))
            .is_err()
        {
            tracing::warn!("render command ring full, cannot remove {}", index);
            return false;
        }
        structure.slots[slot] = Slot::Retiring;

        let mut table = TrackTable::clone(&self.tracks.load());
        if let Some(track) = table.get_mut(slot).and_then(Option::take) {
            track.shared.deactivate();
        }
        self.tracks.store(Arc::new(table));

        tracing::info!("removed {}", index);
        true
    }

    /// Frees render state that the renderer has detached since the last
    /// call. Indices become reusable only after this.
    pub fn collect_removed(&self) -> usize {
        self.structure.lock().reclaim()
    }

    /// Drops all queued events of a track and asks the backend to silence it.
    pub fn reset_track(&self, index: TrackIndex) -> Result<()> {
        let track = self.track(index)?;
        track.queue().reset().map_err(|_| {
            tracing::warn!("control ring full, reset of {} refused", index);
            SchedulerError::QueueCapacityExceeded {
                accepted: 0,
                requested: 1,
            }
        })?;
        tracing::debug!("reset {}", index);
        Ok(())
    }

    pub fn track(&self, index: TrackIndex) -> Result<Arc<Track>> {
        self.tracks
            .load()
            .get(index.as_usize())
            .and_then(Option::clone)
            .ok_or(SchedulerError::TrackNotFound(index))
    }

    pub fn track_indices(&self) -> Vec<TrackIndex> {
        self.tracks
            .load()
            .iter()
            .flatten()
            .map(|track| track.index())
            .collect()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.load().iter().flatten().count()
    }

    // --- Event submission ---

    /// Returns how many events were accepted; 0 for an unknown track.
    pub fn schedule_events(&self, index: TrackIndex, events: &[Event]) -> usize {
        self.submit(index, events, false)
    }

    pub fn handle_events_now(&self, index: TrackIndex, events: &[Event]) -> usize {
        self.submit(index, events, true)
    }

    /// Decodes wire data and schedules it. Malformed data is rejected as a
    /// whole before anything is queued.
    pub fn schedule_raw(&self, index: TrackIndex, data: &[u8], count: usize) -> Result<usize> {
        let events = wire::decode_events(data, count)?;
        Ok(self.schedule_events(index, &events))
    }

    pub fn handle_raw_now(&self, index: TrackIndex, data: &[u8], count: usize) -> Result<usize> {
        let events = wire::decode_events(data, count)?;
        Ok(self.handle_events_now(index, &events))
    }

    /// Removes events at or after `from`. Returns false for an unknown track
    /// or when the request could not be queued.
    pub fn clear_events(&self, index: TrackIndex, from: Frame) -> bool {
        let Ok(track) = self.track(index) else {
            return false;
        };
        let queued = track.queue().clear_from(from).is_ok();
        if !queued {
            tracing::warn!("control ring full, clear of {} refused", index);
        }
        queued
    }

    fn submit(&self, index: TrackIndex, events: &[Event], now: bool) -> usize {
        let Ok(track) = self.track(index) else {
            tracing::debug!("dropping {} events for unknown {}", events.len(), index);
            return 0;
        };
        let accepted = {
            let mut queue = track.queue();
            if now {
                queue.inject_now(events)
            } else {
                queue.insert(events)
            }
        };
        if accepted < events.len() {
            tracing::warn!(
                "{}",
                SchedulerError::QueueCapacityExceeded {
                    accepted,
                    requested: events.len(),
                }
            );
        }
        accepted
    }

    // --- Observability ---

    pub fn position(&self) -> Frame {
        self.shared.position.load(Ordering::Acquire)
    }

    pub fn last_render_time_micros(&self) -> u64 {
        self.shared.last_render_micros.load(Ordering::Relaxed)
    }

    pub fn track_volume(&self, index: TrackIndex) -> Result<f32> {
        Ok(self.track(index)?.shared.volume())
    }

    pub fn set_track_volume(&self, index: TrackIndex, value: f32) -> Result<()> {
        if !value.is_finite() {
            return Err(SchedulerError::InvalidVolume(value));
        }
        self.track(index)?.shared.set_volume(value);
        Ok(())
    }

    /// Events currently queued on a track.
    pub fn buffer_available_count(&self, index: TrackIndex) -> Result<usize> {
        Ok(self.track(index)?.queue().available_count())
    }

    // --- Transport ---

    pub fn play(&self) {
        let previous = self.shared.transport.play();
        if previous != TransportState::Playing {
            tracing::info!("transport playing at frame {}", self.position());
        }
    }

    pub fn pause(&self) {
        if self.shared.transport.pause() {
            tracing::info!("transport paused at frame {}", self.position());
        }
    }

    pub(crate) fn stop(&self) {
        if self.shared.transport.stop() != TransportState::Stopped {
            tracing::info!("transport stopped at frame {}", self.position());
        }
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.transport.state()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Position at the start of the pull.
    pub start: Frame,
    pub frames: u32,
    pub advanced: bool,
    pub delivered: usize,
    pub skipped_tracks: usize,
    pub elapsed_micros: u64,
}

/// Render-side half of the scheduler. Lives on the audio thread; nothing in
/// it locks, allocates or frees.
pub struct Renderer {
    commands: HeapCons<RenderCommand>,
    retired: HeapProd<Box<TrackRenderState>>,
    tracks: Vec<Option<Box<TrackRenderState>>>,
    shared: Arc<EngineShared>,
}

impl Renderer {
    /// Delivers every event due in the next `frame_count` frames to `sink`
    /// and advances the position when playing.
    ///
    /// Injected events are delivered in any transport state. A track whose
    /// sink call fails is skipped for the rest of this pull and retried on
    /// the next one.
    pub fn render_pull(&mut self, frame_count: u32, sink: &mut impl RenderSink) -> RenderStats {
        let started = Instant::now();
        self.apply_commands();

        let playing = self.shared.transport.is_playing();
        let start = self.shared.position.load(Ordering::Acquire);
        let end = start + frame_count as Frame;
        let upto = if playing && frame_count > 0 {
            Some(end - 1)
        } else {
            None
        };

        let mut stats = RenderStats {
            start,
            frames: frame_count,
            advanced: playing,
            ..RenderStats::default()
        };

        for slot in self.tracks.iter_mut() {
            let Some(state) = slot.as_deref_mut() else {
                continue;
            };
            let TrackRenderState { shared, queue } = state;
            // Removed since the commands were applied; its Remove is pending.
            if !shared.is_active() {
                continue;
            }

            if queue.sync() {
                sink.reset(shared.index);
            }

            let result = queue.drain_due_with(upto, |event| {
                let volume = match event.payload {
                    EventPayload::Volume { value } => shared.resolve_volume(value),
                    _ => shared.volume(),
                };
                let offset = event.time.frame().map_or(0, |f| f.saturating_sub(start));
                let delivered = sink.deliver(&Dispatch {
                    track: shared.index,
                    offset: offset as u32,
                    event: *event,
                    volume,
                });
                if delivered.is_ok() && matches!(event.payload, EventPayload::Volume { .. }) {
                    shared.set_volume(volume);
                }
                delivered
            });

            match result {
                Ok(delivered) => stats.delivered += delivered,
                Err(_) => {
                    shared.record_skip();
                    stats.skipped_tracks += 1;
                }
            }
        }

        if playing {
            self.shared.position.store(end, Ordering::Release);
        }

        stats.elapsed_micros = started.elapsed().as_micros() as u64;
        self.shared
            .last_render_micros
            .store(stats.elapsed_micros, Ordering::Relaxed);
        stats
    }

    pub fn position(&self) -> Frame {
        self.shared.position.load(Ordering::Acquire)
    }

    /// Tracks currently installed on the render side.
    pub fn track_count(&self) -> usize {
        self.tracks.iter().flatten().count()
    }

    fn apply_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                RenderCommand::Install(state) => {
                    let slot = state.shared.index.as_usize();
                    match self.tracks.get_mut(slot) {
                        Some(entry) => *entry = Some(state),
                        None => self.retire(state),
                    }
                }
                RenderCommand::Remove(index) => {
                    if let Some(state) = self.tracks.get_mut(index.as_usize()).and_then(Option::take)
                    {
                        self.retire(state);
                    }
                }
            }
        }
    }

    fn retire(&mut self, state: Box<TrackRenderState>) {
        // The return ring holds one entry per slot, and a slot is only freed
        // after its entry was reclaimed, so this cannot fail.
        let _ = self.retired.try_push(state);
    }
}
