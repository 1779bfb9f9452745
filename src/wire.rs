//! Flat binary event format shared with the bridge layer.
//!
//! Every event is [`EVENT_SIZE`] bytes, little endian:
//!
//! | bytes   | field                                        |
//! |---------|----------------------------------------------|
//! | 0..8    | target frame (`u64`, [`NOW_FRAME`] = now)    |
//! | 8       | kind                                         |
//! | 9..16   | payload, unused bytes must be zero           |
//!
//! Note and control events use bytes 9 and 10, pitch bend a `u16` at 9..11,
//! volume an `f32` at 9..13.
//!
//! [`NOW_FRAME`] is reserved, so an event at that frame is encoded one frame
//! earlier.

use crate::events::{Event, EventPayload, EventTime, Frame};

pub const EVENT_SIZE: usize = 16;
pub const NOW_FRAME: Frame = Frame::MAX;

const KIND_NOTE_ON: u8 = 0;
const KIND_NOTE_OFF: u8 = 1;
const KIND_CONTROL_CHANGE: u8 = 2;
const KIND_PITCH_BEND: u8 = 3;
const KIND_VOLUME: u8 = 4;

const PAYLOAD_START: usize = 9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected {expected} bytes for {count} events, got {actual}")]
    LengthMismatch {
        count: usize,
        expected: usize,
        actual: usize,
    },

    #[error("event {index}: unknown kind {kind}")]
    UnknownKind { index: usize, kind: u8 },

    #[error("event {index}: value {value} out of range")]
    ValueOutOfRange { index: usize, value: u32 },

    #[error("event {index}: non-zero padding")]
    NonZeroPadding { index: usize },

    #[error("event {index}: invalid volume {value}")]
    InvalidVolume { index: usize, value: f32 },
}

/// Decodes exactly `count` events, rejecting the whole buffer on the first
/// problem. Allocates a single vector of `count` events.
pub fn decode_events(data: &[u8], count: usize) -> Result<Vec<Event>, DecodeError> {
    let expected = count
        .checked_mul(EVENT_SIZE)
        .ok_or(DecodeError::LengthMismatch {
            count,
            expected: usize::MAX,
            actual: data.len(),
        })?;
    if data.len() != expected {
        return Err(DecodeError::LengthMismatch {
            count,
            expected,
            actual: data.len(),
        });
    }

    let mut events = Vec::with_capacity(count);
    for (index, chunk) in data.chunks_exact(EVENT_SIZE).enumerate() {
        let mut record = [0u8; EVENT_SIZE];
        record.copy_from_slice(chunk);
        events.push(decode_event(index, &record)?);
    }
    Ok(events)
}

fn decode_event(index: usize, record: &[u8; EVENT_SIZE]) -> Result<Event, DecodeError> {
    let mut frame_bytes = [0u8; 8];
    frame_bytes.copy_from_slice(&record[..8]);
    let frame = Frame::from_le_bytes(frame_bytes);
    let time = if frame == NOW_FRAME {
        EventTime::Now
    } else {
        EventTime::At(frame)
    };

    let payload = &record[PAYLOAD_START..];
    let (payload, used) = match record[8] {
        KIND_NOTE_ON => {
            let (note, velocity) = midi_pair(index, payload)?;
            (EventPayload::NoteOn { note, velocity }, 2)
        }
        KIND_NOTE_OFF => {
            let (note, velocity) = midi_pair(index, payload)?;
            (EventPayload::NoteOff { note, velocity }, 2)
        }
        KIND_CONTROL_CHANGE => {
            let (controller, value) = midi_pair(index, payload)?;
            (EventPayload::ControlChange { controller, value }, 2)
        }
        KIND_PITCH_BEND => {
            let value = u16::from_le_bytes([payload[0], payload[1]]);
            if value > 0x3FFF {
                return Err(DecodeError::ValueOutOfRange {
                    index,
                    value: value as u32,
                });
            }
            (EventPayload::PitchBend { value }, 2)
        }
        KIND_VOLUME => {
            let value = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DecodeError::InvalidVolume { index, value });
            }
            (EventPayload::Volume { value }, 4)
        }
        kind => return Err(DecodeError::UnknownKind { index, kind }),
    };

    if payload_padding(record, used).iter().any(|b| *b != 0) {
        return Err(DecodeError::NonZeroPadding { index });
    }

    Ok(Event { time, payload })
}

fn payload_padding(record: &[u8; EVENT_SIZE], used: usize) -> &[u8] {
    &record[PAYLOAD_START + used..]
}

fn midi_pair(index: usize, payload: &[u8]) -> Result<(u8, u8), DecodeError> {
    for &byte in &payload[..2] {
        if byte > 127 {
            return Err(DecodeError::ValueOutOfRange {
                index,
                value: byte as u32,
            });
        }
    }
    Ok((payload[0], payload[1]))
}

/// Appends the wire form of `events` to `out`.
pub fn encode_events(events: &[Event], out: &mut Vec<u8>) {
    out.reserve(events.len() * EVENT_SIZE);
    for event in events {
        out.extend_from_slice(&encode_event(event));
    }
}

pub fn encode_event(event: &Event) -> [u8; EVENT_SIZE] {
    let mut record = [0u8; EVENT_SIZE];
    let frame = match event.time {
        EventTime::Now => NOW_FRAME,
        EventTime::At(frame) => frame.min(NOW_FRAME - 1),
    };
    record[..8].copy_from_slice(&frame.to_le_bytes());

    let payload = &mut record[PAYLOAD_START..];
    let kind = match event.payload {
        EventPayload::NoteOn { note, velocity } => {
            payload[0] = note;
            payload[1] = velocity;
            KIND_NOTE_ON
        }
        EventPayload::NoteOff { note, velocity } => {
            payload[0] = note;
            payload[1] = velocity;
            KIND_NOTE_OFF
        }
        EventPayload::ControlChange { controller, value } => {
            payload[0] = controller;
            payload[1] = value;
            KIND_CONTROL_CHANGE
        }
        EventPayload::PitchBend { value } => {
            payload[..2].copy_from_slice(&value.to_le_bytes());
            KIND_PITCH_BEND
        }
        EventPayload::Volume { value } => {
            payload[..4].copy_from_slice(&value.to_le_bytes());
            KIND_VOLUME
        }
    };
    record[8] = kind;
    record
}
