//! Per-track event queue.
//!
//! The queue is split like a ring buffer: the control side owns a
//! [`QueueProducer`] and the render side a [`QueueConsumer`]. Operations flow
//! through a lock-free SPSC ring in submission order and are folded into a
//! preallocated min-heap on the render side, so draining costs only the
//! events that are due.

use crate::events::{Event, EventTime, Frame};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Ring slots kept free for clear and reset requests.
pub const CONTROL_RESERVE: usize = 64;

/// Largest per-track capacity; larger requests are clamped to it.
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

#[derive(Debug, Clone, Copy)]
enum QueueOp {
    Schedule(Event),
    Now(Event),
    ClearFrom(Frame),
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue control ring is full")]
pub struct ControlRingFull;

struct Counters {
    capacity: usize,
    queued: AtomicUsize,
}

pub fn event_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let capacity = capacity.clamp(1, MAX_QUEUE_CAPACITY);
    let ring = HeapRb::<QueueOp>::new(capacity + CONTROL_RESERVE);
    let (ops, incoming) = ring.split();
    let counters = Arc::new(Counters {
        capacity,
        queued: AtomicUsize::new(0),
    });

    let producer = QueueProducer {
        ops,
        counters: counters.clone(),
    };
    let consumer = QueueConsumer {
        incoming,
        pending: BinaryHeap::with_capacity(capacity),
        now: VecDeque::with_capacity(capacity),
        next_seq: 0,
        counters,
    };
    (producer, consumer)
}

pub struct QueueProducer {
    ops: HeapProd<QueueOp>,
    counters: Arc<Counters>,
}

impl QueueProducer {
    /// Enqueues as many events as capacity allows, in order. Events timed
    /// [`EventTime::Now`] are treated as injected.
    pub fn insert(&mut self, events: &[Event]) -> usize {
        self.push_events(events, false)
    }

    /// Enqueues events to fire on the next drain regardless of position.
    pub fn inject_now(&mut self, events: &[Event]) -> usize {
        self.push_events(events, true)
    }

    pub fn clear_from(&mut self, from: Frame) -> Result<(), ControlRingFull> {
        self.ops
            .try_push(QueueOp::ClearFrom(from))
            .map_err(|_| ControlRingFull)
    }

    /// Drops every queued event and raises an all-notes-off signal on the
    /// consumer side.
    pub fn reset(&mut self) -> Result<(), ControlRingFull> {
        self.ops.try_push(QueueOp::Reset).map_err(|_| ControlRingFull)
    }

    pub fn available_count(&self) -> usize {
        self.counters.queued.load(Ordering::Acquire)
    }

    pub fn free_capacity(&self) -> usize {
        self.counters.capacity.saturating_sub(self.available_count())
    }

    pub fn capacity(&self) -> usize {
        self.counters.capacity
    }

    fn push_events(&mut self, events: &[Event], force_now: bool) -> usize {
        let reserved = self.free_capacity().min(events.len());
        if reserved == 0 {
            return 0;
        }
        // Reserve before publishing so the consumer never sees more events
        // than the counter accounts for.
        self.counters.queued.fetch_add(reserved, Ordering::AcqRel);

        let mut pushed = 0;
        for event in &events[..reserved] {
            let op = if force_now || event.is_now() {
                QueueOp::Now(Event {
                    time: EventTime::Now,
                    payload: event.payload,
                })
            } else {
                QueueOp::Schedule(*event)
            };
            if self.ops.try_push(op).is_err() {
                break;
            }
            pushed += 1;
        }

        if pushed < reserved {
            self.counters
                .queued
                .fetch_sub(reserved - pushed, Ordering::AcqRel);
        }
        pushed
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    frame: Frame,
    seq: u64,
    event: Event,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.frame == other.frame && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed so the max-heap pops the earliest frame, then the earliest
    // submission.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .frame
            .cmp(&self.frame)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct QueueConsumer {
    incoming: HeapCons<QueueOp>,
    pending: BinaryHeap<Pending>,
    now: VecDeque<Event>,
    next_seq: u64,
    counters: Arc<Counters>,
}

impl QueueConsumer {
    /// Folds every submitted operation into the render-side state. Returns
    /// true when a reset was among them.
    ///
    /// Never allocates: the producer's capacity accounting bounds the heap
    /// and the now-deque to the capacity they were created with.
    pub fn sync(&mut self) -> bool {
        let mut reset = false;
        while let Some(op) = self.incoming.try_pop() {
            match op {
                QueueOp::Schedule(event) => {
                    let frame = event.time.frame().unwrap_or(0);
                    self.pending.push(Pending {
                        frame,
                        seq: self.next_seq,
                        event,
                    });
                    self.next_seq += 1;
                }
                QueueOp::Now(event) => self.now.push_back(event),
                QueueOp::ClearFrom(from) => {
                    let before = self.pending.len();
                    self.pending.retain(|p| p.frame < from);
                    self.release(before - self.pending.len());
                }
                QueueOp::Reset => {
                    let dropped = self.pending.len() + self.now.len();
                    self.pending.clear();
                    self.now.clear();
                    self.release(dropped);
                    reset = true;
                }
            }
        }
        reset
    }

    /// Hands due events to `deliver` in order: injected events first, then
    /// position events with `frame <= upto`. With `upto == None` only
    /// injected events are drained.
    ///
    /// An event is removed only once `deliver` accepts it. On the first error
    /// draining stops and the error is returned; the rejected event stays at
    /// the head of the queue.
    pub fn drain_due_with<E>(
        &mut self,
        upto: Option<Frame>,
        mut deliver: impl FnMut(&Event) -> Result<(), E>,
    ) -> Result<usize, E> {
        let mut delivered = 0;

        while let Some(event) = self.now.front() {
            deliver(event)?;
            self.now.pop_front();
            self.release(1);
            delivered += 1;
        }

        if let Some(upto) = upto {
            while let Some(head) = self.pending.peek() {
                if head.frame > upto {
                    break;
                }
                deliver(&head.event)?;
                self.pending.pop();
                self.release(1);
                delivered += 1;
            }
        }

        Ok(delivered)
    }

    /// Syncs and collects due events into a new vector (allocates, for tests
    /// and offline tooling only).
    pub fn drain_due(&mut self, upto: Option<Frame>) -> Vec<Event> {
        self.sync();
        let mut out = Vec::new();
        let _ = self.drain_due_with(upto, |event| {
            out.push(*event);
            Ok::<(), std::convert::Infallible>(())
        });
        out
    }

    /// Events held on the render side, not counting ops still in the ring.
    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.now.len()
    }

    pub fn next_frame(&self) -> Option<Frame> {
        self.pending.peek().map(|p| p.frame)
    }

    fn release(&self, count: usize) {
        if count > 0 {
            self.counters.queued.fetch_sub(count, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;

    fn notes(events: &[Event]) -> Vec<u8> {
        events
            .iter()
            .map(|e| match e.payload {
                EventPayload::NoteOn { note, .. } | EventPayload::NoteOff { note, .. } => note,
                _ => panic!("expected a note event"),
            })
            .collect()
    }

    #[test]
    fn drains_in_frame_order_with_fifo_ties() {
        let (mut producer, mut consumer) = event_queue(16);
        let accepted = producer.insert(&[
            Event::note_on(100, 1, 100),
            Event::note_on(50, 2, 100),
            Event::note_on(50, 3, 100),
        ]);
        assert_eq!(accepted, 3);

        let due = consumer.drain_due(Some(63));
        assert_eq!(notes(&due), vec![2, 3]);
        assert_eq!(producer.available_count(), 1);
        assert_eq!(consumer.next_frame(), Some(100));

        let rest = consumer.drain_due(Some(1000));
        assert_eq!(notes(&rest), vec![1]);
        assert_eq!(producer.available_count(), 0);
    }

    #[test]
    fn never_returns_events_past_upto_and_never_twice() {
        let (mut producer, mut consumer) = event_queue(64);
        let events: Vec<Event> = (0..40u8)
            .map(|i| Event::note_on((i as u64 * 37) % 200, i, 1))
            .collect();
        producer.insert(&events);

        let mut seen = Vec::new();
        for upto in (0..=200).step_by(16) {
            for event in consumer.drain_due(Some(upto)) {
                assert!(event.time.frame().unwrap() <= upto);
                seen.push(event);
            }
        }
        seen.extend(consumer.drain_due(Some(Frame::MAX - 1)));

        let mut got = notes(&seen);
        got.sort();
        assert_eq!(got, (0..40u8).collect::<Vec<_>>());
    }

    #[test]
    fn fifo_ties_hold_across_separate_inserts() {
        let (mut producer, mut consumer) = event_queue(16);
        producer.insert(&[Event::note_on(10, 1, 1)]);
        consumer.sync();
        producer.insert(&[Event::note_on(10, 2, 1), Event::note_on(5, 3, 1)]);
        producer.insert(&[Event::note_on(10, 4, 1)]);

        assert_eq!(notes(&consumer.drain_due(Some(10))), vec![3, 1, 2, 4]);
    }

    #[test]
    fn injected_events_come_first_regardless_of_position() {
        let (mut producer, mut consumer) = event_queue(16);
        producer.insert(&[Event::note_on(0, 1, 1), Event::note_on(5, 2, 1)]);
        producer.inject_now(&[Event::note_on(9999, 7, 1), Event::note_on(0, 8, 1)]);

        let due = consumer.drain_due(Some(5));
        assert_eq!(notes(&due), vec![7, 8, 1, 2]);
        assert!(due[0].is_now() && due[1].is_now());
    }

    #[test]
    fn now_timed_events_in_insert_bypass_ordering() {
        let (mut producer, mut consumer) = event_queue(16);
        producer.insert(&[
            Event::note_on(3, 1, 1),
            Event::now(EventPayload::NoteOn {
                note: 2,
                velocity: 1,
            }),
        ]);

        assert_eq!(notes(&consumer.drain_due(None)), vec![2]);
        assert_eq!(notes(&consumer.drain_due(Some(3))), vec![1]);
    }

    #[test]
    fn clear_from_removes_only_the_tail() {
        let (mut producer, mut consumer) = event_queue(16);
        producer.insert(&[
            Event::note_on(10, 1, 1),
            Event::note_on(20, 2, 1),
            Event::note_on(30, 3, 1),
        ]);
        producer.inject_now(&[Event::note_on(40, 4, 1)]);
        producer.clear_from(20).unwrap();
        producer.insert(&[Event::note_on(25, 5, 1)]);

        consumer.sync();
        assert_eq!(producer.available_count(), 3);
        assert_eq!(notes(&consumer.drain_due(Some(100))), vec![4, 1, 5]);
    }

    #[test]
    fn reset_drops_everything_and_signals() {
        let (mut producer, mut consumer) = event_queue(16);
        producer.insert(&[Event::note_on(10, 1, 1), Event::note_on(20, 2, 1)]);
        producer.inject_now(&[Event::note_on(0, 3, 1)]);
        producer.reset().unwrap();

        assert!(consumer.sync());
        assert_eq!(consumer.pending_len(), 0);
        assert_eq!(producer.available_count(), 0);
        assert!(consumer.drain_due(Some(1000)).is_empty());
        assert!(!consumer.sync());
    }

    #[test]
    fn capacity_limits_accepted_count() {
        let (mut producer, mut consumer) = event_queue(4);
        let events: Vec<Event> = (0..6u8).map(|i| Event::note_on(i as u64, i, 1)).collect();

        assert_eq!(producer.insert(&events), 4);
        assert_eq!(producer.free_capacity(), 0);
        assert_eq!(producer.inject_now(&events[..1]), 0);

        consumer.drain_due(Some(1));
        assert_eq!(producer.available_count(), 2);
        assert_eq!(producer.insert(&events[4..]), 2);
        assert_eq!(producer.available_count(), 4);
    }

    #[test]
    fn oversized_capacity_is_clamped() {
        let (producer, _consumer) = event_queue(usize::MAX);
        assert_eq!(producer.capacity(), MAX_QUEUE_CAPACITY);
        assert_eq!(producer.free_capacity(), MAX_QUEUE_CAPACITY);

        let (producer, _consumer) = event_queue(0);
        assert_eq!(producer.capacity(), 1);
    }

    #[test]
    fn control_ops_use_the_reserve_when_events_fill_the_queue() {
        let (mut producer, _consumer) = event_queue(2);
        producer.insert(&[Event::note_on(1, 1, 1), Event::note_on(2, 2, 1)]);

        for _ in 0..CONTROL_RESERVE {
            producer.clear_from(0).unwrap();
        }
        assert_eq!(producer.reset(), Err(ControlRingFull));
    }

    #[test]
    fn failed_delivery_keeps_event_queued() {
        let (mut producer, mut consumer) = event_queue(8);
        producer.insert(&[Event::note_on(1, 1, 1), Event::note_on(2, 2, 1)]);
        consumer.sync();

        let mut calls = 0;
        let result = consumer.drain_due_with(Some(10), |_| {
            calls += 1;
            if calls == 2 { Err("backend busy") } else { Ok(()) }
        });
        assert_eq!(result, Err("backend busy"));
        assert_eq!(producer.available_count(), 1);
        assert_eq!(notes(&consumer.drain_due(Some(10))), vec![2]);
    }
}
