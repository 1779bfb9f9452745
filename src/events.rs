/// Absolute position on the audio clock, in sample frames.
pub type Frame = u64;

/// Stable identity of a track inside one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackIndex(pub u32);

impl TrackIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for TrackIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// Bypasses frame ordering and fires on the next render pull.
    Now,
    At(Frame),
}

impl EventTime {
    pub fn frame(self) -> Option<Frame> {
        match self {
            EventTime::Now => None,
            EventTime::At(frame) => Some(frame),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPayload {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
    /// 14-bit bend, 8192 is centered.
    PitchBend { value: u16 },
    /// Track gain, applied by the scheduler when dispatched.
    Volume { value: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub time: EventTime,
    pub payload: EventPayload,
}

impl Event {
    pub fn at(frame: Frame, payload: EventPayload) -> Self {
        Self {
            time: EventTime::At(frame),
            payload,
        }
    }

    pub fn now(payload: EventPayload) -> Self {
        Self {
            time: EventTime::Now,
            payload,
        }
    }

    pub fn note_on(frame: Frame, note: u8, velocity: u8) -> Self {
        Self::at(frame, EventPayload::NoteOn { note, velocity })
    }

    pub fn note_off(frame: Frame, note: u8) -> Self {
        Self::at(frame, EventPayload::NoteOff { note, velocity: 0 })
    }

    pub fn volume(frame: Frame, value: f32) -> Self {
        Self::at(frame, EventPayload::Volume { value })
    }

    pub fn is_now(&self) -> bool {
        matches!(self.time, EventTime::Now)
    }
}
