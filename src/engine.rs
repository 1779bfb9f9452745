use crate::audio::{InstrumentHandle, InstrumentLoader};
use crate::config::EngineConfig;
use crate::error::SchedulerError;
use crate::events::TrackIndex;
use crate::timing::{Renderer, Scheduler};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the engine thread reclaims removed tracks while idle.
const RECLAIM_INTERVAL: Duration = Duration::from_millis(50);

/// Identifies one asynchronous track creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone)]
pub enum EngineCommand {
    AddTrack {
        request: RequestId,
        instrument: InstrumentHandle,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    Ready { sample_rate: u32 },
    TrackAdded { request: RequestId, index: TrackIndex },
    TrackFailed { request: RequestId, message: String },
    Stopped,
}

/// Control-side view of a running engine. Slow work (instrument loading)
/// goes through the engine thread; everything else talks to the
/// [`Scheduler`] directly.
pub struct EngineHandle {
    command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    scheduler: Arc<Scheduler>,
    next_request: u64,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Queues a track creation. The result arrives on `update_rx` as
    /// `TrackAdded` or `TrackFailed` carrying the returned id.
    pub fn add_track(&mut self, instrument: InstrumentHandle) -> RequestId {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        if self
            .command_tx
            .send(EngineCommand::AddTrack {
                request,
                instrument,
            })
            .is_err()
        {
            tracing::warn!("engine thread is gone, {:?} dropped", request);
        }
        request
    }

    /// Stops the transport and joins the engine thread.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if thread.join().is_err() {
            tracing::error!("engine thread panicked");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts the engine thread. The returned [`Renderer`] belongs on the audio
/// thread.
pub fn spawn_engine(
    config: &EngineConfig,
    loader: impl InstrumentLoader,
) -> (EngineHandle, Renderer) {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let (scheduler, renderer) = Scheduler::new(config.scheduler_config());
    let scheduler = Arc::new(scheduler);

    // Preloaded instruments go through the same path as runtime requests.
    let mut next_request = 0;
    for instrument in &config.tracks {
        let _ = command_tx.send(EngineCommand::AddTrack {
            request: RequestId(next_request),
            instrument: instrument.clone(),
        });
        next_request += 1;
    }

    let thread_scheduler = scheduler.clone();
    let thread = std::thread::spawn(move || {
        engine_thread(thread_scheduler, loader, command_rx, update_tx);
    });

    let handle = EngineHandle {
        command_tx,
        update_rx,
        scheduler,
        next_request,
        thread: Some(thread),
    };
    (handle, renderer)
}

fn engine_thread(
    scheduler: Arc<Scheduler>,
    mut loader: impl InstrumentLoader,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    tracing::info!("engine started at {} Hz", scheduler.sample_rate());
    let _ = update_tx.send(EngineUpdate::Ready {
        sample_rate: scheduler.sample_rate(),
    });

    loop {
        match command_rx.recv_timeout(RECLAIM_INTERVAL) {
            Ok(EngineCommand::AddTrack {
                request,
                instrument,
            }) => {
                let update = match add_track(&scheduler, &mut loader, instrument) {
                    Ok(index) => EngineUpdate::TrackAdded { request, index },
                    Err(message) => {
                        tracing::warn!("{:?} failed: {}", request, message);
                        EngineUpdate::TrackFailed { request, message }
                    }
                };
                let _ = update_tx.send(update);
            }
            Ok(EngineCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        scheduler.collect_removed();
    }

    scheduler.collect_removed();
    scheduler.stop();
    tracing::info!("engine stopped at frame {}", scheduler.position());
    let _ = update_tx.send(EngineUpdate::Stopped);
}

fn add_track(
    scheduler: &Scheduler,
    loader: &mut impl InstrumentLoader,
    instrument: InstrumentHandle,
) -> Result<TrackIndex, String> {
    tracing::debug!("loading {}", instrument.describe());
    loader
        .load(&instrument)
        .map_err(|e| SchedulerError::InstrumentLoadFailure(e).to_string())?;
    scheduler.add_track(instrument).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{InstrumentLoadError, PathLoader, RenderOutput};
    use crate::events::Event;
    use crate::timing::TransportState;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn builtin(name: &str) -> InstrumentHandle {
        InstrumentHandle::Builtin { name: name.into() }
    }

    fn next_update(handle: &EngineHandle) -> EngineUpdate {
        handle.update_rx.recv_timeout(TIMEOUT).unwrap()
    }

    #[test]
    fn reports_ready_then_track_creation() {
        let (mut handle, _renderer) = spawn_engine(&EngineConfig::default(), PathLoader);
        assert_eq!(
            next_update(&handle),
            EngineUpdate::Ready {
                sample_rate: 44_100
            }
        );

        let request = handle.add_track(builtin("piano"));
        assert_eq!(
            next_update(&handle),
            EngineUpdate::TrackAdded {
                request,
                index: TrackIndex(0)
            }
        );
        assert_eq!(handle.scheduler().track_count(), 1);
    }

    #[test]
    fn load_failure_is_reported_asynchronously() {
        let (mut handle, _renderer) = spawn_engine(&EngineConfig::default(), PathLoader);
        next_update(&handle);

        let request = handle.add_track(InstrumentHandle::Sf2 {
            path: std::env::temp_dir().join("trackseq-missing.sf2"),
            is_asset: false,
            preset_index: 0,
        });
        match next_update(&handle) {
            EngineUpdate::TrackFailed {
                request: failed,
                message,
            } => {
                assert_eq!(failed, request);
                assert!(message.contains("not found"));
            }
            other => panic!("unexpected update {:?}", other),
        }
        assert_eq!(handle.scheduler().track_count(), 0);
    }

    #[test]
    fn preloads_configured_tracks() {
        let config = EngineConfig {
            tracks: vec![builtin("a"), builtin("b")],
            ..EngineConfig::default()
        };
        let (handle, _renderer) = spawn_engine(&config, PathLoader);
        next_update(&handle);
        assert!(matches!(
            next_update(&handle),
            EngineUpdate::TrackAdded {
                request: RequestId(0),
                ..
            }
        ));
        assert!(matches!(
            next_update(&handle),
            EngineUpdate::TrackAdded {
                request: RequestId(1),
                ..
            }
        ));
    }

    struct SlowLoader;

    impl InstrumentLoader for SlowLoader {
        fn load(&mut self, instrument: &InstrumentHandle) -> Result<(), InstrumentLoadError> {
            std::thread::sleep(Duration::from_millis(20));
            match instrument {
                InstrumentHandle::Builtin { name } if name == "bad" => {
                    Err(InstrumentLoadError::Invalid(name.clone()))
                }
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn render_path_runs_while_instruments_load() {
        let (mut handle, mut renderer) = spawn_engine(&EngineConfig::default(), SlowLoader);
        next_update(&handle);
        handle.scheduler().play();

        let request = handle.add_track(builtin("slow"));
        let mut out = RenderOutput::with_capacity(16, 4);
        renderer.render_pull(64, &mut out);
        assert_eq!(renderer.position(), 64);

        let index = match next_update(&handle) {
            EngineUpdate::TrackAdded { request: r, index } if r == request => index,
            other => panic!("unexpected update {:?}", other),
        };
        let scheduler = handle.scheduler().clone();
        scheduler.schedule_events(index, &[Event::note_on(64, 60, 100)]);
        out.clear();
        renderer.render_pull(64, &mut out);
        assert_eq!(out.for_track(index).count(), 1);

        let bad = handle.add_track(builtin("bad"));
        assert!(matches!(
            next_update(&handle),
            EngineUpdate::TrackFailed { request, .. } if request == bad
        ));
    }

    #[test]
    fn shutdown_stops_transport_and_reclaims() {
        let (mut handle, mut renderer) = spawn_engine(&EngineConfig::default(), PathLoader);
        next_update(&handle);
        handle.add_track(builtin("x"));
        let index = match next_update(&handle) {
            EngineUpdate::TrackAdded { index, .. } => index,
            other => panic!("unexpected update {:?}", other),
        };
        let scheduler = handle.scheduler().clone();
        scheduler.play();

        let mut out = RenderOutput::default();
        renderer.render_pull(32, &mut out);
        assert!(scheduler.remove_track(index));
        renderer.render_pull(32, &mut out);

        handle.shutdown();
        assert_eq!(scheduler.transport_state(), TransportState::Stopped);
        assert_eq!(next_update(&handle), EngineUpdate::Stopped);
        // Slot 0 was reclaimed, so it is handed out again.
        assert_eq!(scheduler.add_track(builtin("y")).unwrap(), TrackIndex(0));
    }
}
