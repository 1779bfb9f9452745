use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    fn to_u8(self) -> u8 {
        match self {
            TransportState::Stopped => 0,
            TransportState::Playing => 1,
            TransportState::Paused => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }
}

/// Transport state shared between the control and render threads.
pub struct Transport {
    state: AtomicU8,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TransportState::Stopped.to_u8()),
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    /// Moves to `Playing` from any state. Returns the previous state.
    pub fn play(&self) -> TransportState {
        TransportState::from_u8(
            self.state
                .swap(TransportState::Playing.to_u8(), Ordering::AcqRel),
        )
    }

    /// Moves to `Paused`, only from `Playing`. Returns whether it changed.
    pub fn pause(&self) -> bool {
        self.state
            .compare_exchange(
                TransportState::Playing.to_u8(),
                TransportState::Paused.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn stop(&self) -> TransportState {
        TransportState::from_u8(
            self.state
                .swap(TransportState::Stopped.to_u8(), Ordering::AcqRel),
        )
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
