mod queue;
mod scheduler;
mod transport;

pub use queue::{
    CONTROL_RESERVE, ControlRingFull, MAX_QUEUE_CAPACITY, QueueConsumer, QueueProducer, event_queue,
};
pub use scheduler::{RenderStats, Renderer, Scheduler, SchedulerConfig};
pub use transport::{Transport, TransportState};
