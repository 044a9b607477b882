//! Lock-free SPSC FIFO for real-time events
//!
//! The only sanctioned channel between control threads and the audio thread.
//! Wait-free on both sides: push fails instead of blocking when the ring is
//! full, pop returns `None` when it is empty. No allocation after
//! construction.
//!
//! Exactly one thread may push and exactly one thread may pop over the
//! lifetime of a FIFO; that discipline is configured at wiring time and not
//! enforced at runtime.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::RtEvent;

/// Default capacity of the engine-level event FIFOs
pub const RT_EVENT_FIFO_CAPACITY: usize = 4096;

/// Bounded single-producer/single-consumer ring buffer of [`RtEvent`].
///
/// `N` must be a power of two; this is checked at compile time.
pub struct RtEventFifo<const N: usize = RT_EVENT_FIFO_CAPACITY> {
    events: Box<[UnsafeCell<MaybeUninit<RtEvent>>]>,
    /// Write position (only advanced by the producer)
    write_pos: AtomicUsize,
    /// Read position (only advanced by the consumer)
    read_pos: AtomicUsize,
}

// SAFETY: the ring is safe to share between the one producer thread and the
// one consumer thread; slots are published/retired through the acquire and
// release pairs on the two positions.
unsafe impl<const N: usize> Send for RtEventFifo<N> {}
unsafe impl<const N: usize> Sync for RtEventFifo<N> {}

impl<const N: usize> RtEventFifo<N> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N.is_power_of_two());
    const MASK: usize = N - 1;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;

        let events = (0..N)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        Self {
            events,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Push an event; returns `false` if the ring is full
    #[inline]
    pub fn push(&self, event: RtEvent) -> bool {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        if write.wrapping_sub(read) >= N {
            return false;
        }

        // SAFETY: the slot is outside the readable region, so only this
        // producer touches it until the store below publishes it
        unsafe {
            (*self.events[write & Self::MASK].get()).write(event);
        }

        self.write_pos
            .store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pop the oldest event; returns `None` if the ring is empty
    #[inline]
    pub fn pop(&self) -> Option<RtEvent> {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);

        if write == read {
            return None;
        }

        // SAFETY: the slot was published by the producer's release store and
        // stays untouched until the store below retires it
        let event = unsafe { (*self.events[read & Self::MASK].get()).assume_init() };

        self.read_pos.store(read.wrapping_add(1), Ordering::Release);
        Some(event)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write_pos.load(Ordering::Acquire) == self.read_pos.load(Ordering::Acquire)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for RtEventFifo<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything a processor can publish RT events into.
///
/// Installed as a processor's event output; implemented by the FIFO so
/// sinks are plain non-owning handles with no back-ownership.
pub trait RtEventPipe: Send + Sync {
    /// Returns `false` if the event was dropped (pipe full)
    fn send_event(&self, event: RtEvent) -> bool;
}

impl<const N: usize> RtEventPipe for RtEventFifo<N> {
    #[inline]
    fn send_event(&self, event: RtEvent) -> bool {
        self.push(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectId;

    #[test]
    fn test_push_pop_order() {
        let fifo: RtEventFifo<8> = RtEventFifo::new();
        assert!(fifo.is_empty());

        for note in 0..4u8 {
            assert!(fifo.push(RtEvent::note_on(ObjectId(1), 0, note, 1.0)));
        }

        for note in 0..4u8 {
            match fifo.pop() {
                Some(RtEvent::NoteOn(e)) => assert_eq!(e.note, note),
                other => panic!("unexpected pop result: {:?}", other),
            }
        }
        assert!(fifo.pop().is_none());
    }

    #[test]
    fn test_full_fifo_rejects_and_recovers() {
        let fifo: RtEventFifo<4> = RtEventFifo::new();

        for _ in 0..4 {
            assert!(fifo.push(RtEvent::note_on(ObjectId(1), 0, 60, 1.0)));
        }
        // Capacity reached, the next push must fail
        assert!(!fifo.push(RtEvent::note_on(ObjectId(1), 0, 61, 1.0)));

        assert!(fifo.pop().is_some());
        assert!(fifo.push(RtEvent::note_on(ObjectId(1), 0, 62, 1.0)));
    }

    #[test]
    fn test_wrap_around() {
        let fifo: RtEventFifo<4> = RtEventFifo::new();

        for round in 0..10u8 {
            assert!(fifo.push(RtEvent::note_on(ObjectId(1), 0, round, 1.0)));
            match fifo.pop() {
                Some(RtEvent::NoteOn(e)) => assert_eq!(e.note, round),
                other => panic!("unexpected pop result: {:?}", other),
            }
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_cross_thread_ordering() {
        use std::sync::Arc;

        let fifo: Arc<RtEventFifo<1024>> = Arc::new(RtEventFifo::new());
        let producer = fifo.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..500u32 {
                while !producer.push(RtEvent::parameter_change(ObjectId(1), 0, ObjectId(2), i as f32))
                {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0u32;
        while expected < 500 {
            if let Some(RtEvent::ParameterChange(e)) = fifo.pop() {
                assert_eq!(e.value, expected as f32);
                expected += 1;
            }
        }
        handle.join().unwrap();
    }
}
