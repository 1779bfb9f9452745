use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use trackseq::{
    EngineConfig, EngineUpdate, Event, InstrumentHandle, PathLoader, RenderOutput, spawn_engine,
    wire,
};

const DEMO_SECONDS: u64 = 2;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&PathBuf::from(path))?,
        None => EngineConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (mut engine, mut renderer) = spawn_engine(&config, PathLoader);
    let request = engine.add_track(InstrumentHandle::Builtin {
        name: "demo".to_string(),
    });

    let track = loop {
        match engine.update_rx.recv_timeout(Duration::from_secs(5))? {
            EngineUpdate::TrackAdded { request: r, index } if r == request => break index,
            EngineUpdate::TrackFailed { request: r, message } if r == request => {
                return Err(message.into());
            }
            update => tracing::debug!("engine update: {:?}", update),
        }
    };

    let scheduler = engine.scheduler().clone();
    let beat = config.sample_rate as u64 / 4;
    let arpeggio: Vec<Event> = [60u8, 64, 67, 72]
        .iter()
        .cycle()
        .take(8)
        .enumerate()
        .flat_map(|(i, &note)| {
            let on = i as u64 * beat;
            [Event::note_on(on, note, 100), Event::note_off(on + beat / 2, note)]
        })
        .collect();
    let mut data = Vec::new();
    wire::encode_events(&arpeggio, &mut data);
    let accepted = scheduler.schedule_raw(track, &data, arpeggio.len())?;
    tracing::info!("scheduled {} events on {}", accepted, track);

    scheduler.play();

    let period = config.buffer_duration();
    let pulls = DEMO_SECONDS * config.sample_rate as u64 / config.buffer_size as u64;
    let mut output = RenderOutput::for_config(&config.scheduler_config());
    let mut next_deadline = Instant::now();

    for _ in 0..pulls {
        output.clear();
        let stats = renderer.render_pull(config.buffer_size, &mut output);
        for dispatch in output.dispatches() {
            tracing::info!(
                "frame {} (+{}) {}: {:?} at volume {:.2}",
                stats.start,
                dispatch.offset,
                dispatch.track,
                dispatch.event.payload,
                dispatch.volume
            );
        }

        next_deadline += period;
        if let Some(wait) = next_deadline.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    tracing::info!(
        "finished at frame {}, last render took {} us, {} events left",
        scheduler.position(),
        scheduler.last_render_time_micros(),
        scheduler.buffer_available_count(track)?
    );

    engine.shutdown();
    Ok(())
}
