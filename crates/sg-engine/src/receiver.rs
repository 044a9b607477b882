//! Synchronous wait-for-response over the RT reply FIFO
//!
//! Control-side code that sends a command to the audio thread blocks here
//! until the matching acknowledgement comes back or the timeout elapses.
//! Completions that belong to other waiters are parked in a local list so
//! nothing is ever consumed on someone else's behalf. The RT side stays
//! wait-free; this side polls with a short sleep.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sg_core::{AsyncWorkStatus, EventId, RtEvent, RtEventFifo};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

struct ReceiveNode {
    id: EventId,
    status: AsyncWorkStatus,
}

/// Consumer of the audio thread's reply FIFO
pub struct AsyncEventReceiver {
    queue: Arc<RtEventFifo>,
    receive_list: Vec<ReceiveNode>,
}

impl AsyncEventReceiver {
    pub fn new(queue: Arc<RtEventFifo>) -> Self {
        Self {
            queue,
            receive_list: Vec::new(),
        }
    }

    /// Block until a completion for `id` arrives, or `timeout` elapses.
    ///
    /// Returns `true` only when the completion arrived in time with a
    /// success status.
    pub fn wait_for_response(&mut self, id: EventId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(position) = self.receive_list.iter().position(|node| node.id == id) {
                let node = self.receive_list.swap_remove(position);
                return node.status == AsyncWorkStatus::Completed;
            }

            while let Some(event) = self.queue.pop() {
                if let RtEvent::AsyncWorkCompletion(e) = event {
                    if e.event_id == id {
                        return e.status == AsyncWorkStatus::Completed;
                    }
                    // Keep it for whoever is waiting on it
                    self.receive_list.push(ReceiveNode {
                        id: e.event_id,
                        status: e.status,
                    });
                }
            }

            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::ObjectId;

    #[test]
    fn test_matching_response_returns_true() {
        let queue = Arc::new(RtEventFifo::new());
        let mut receiver = AsyncEventReceiver::new(queue.clone());

        let id = EventId(1001);
        queue.push(RtEvent::async_work_completion(
            ObjectId::NONE,
            id,
            AsyncWorkStatus::Completed,
        ));
        assert!(receiver.wait_for_response(id, Duration::from_millis(10)));
    }

    #[test]
    fn test_failed_status_returns_false() {
        let queue = Arc::new(RtEventFifo::new());
        let mut receiver = AsyncEventReceiver::new(queue.clone());

        let id = EventId(1002);
        queue.push(RtEvent::async_work_completion(
            ObjectId::NONE,
            id,
            AsyncWorkStatus::Failed,
        ));
        assert!(!receiver.wait_for_response(id, Duration::from_millis(10)));
    }

    #[test]
    fn test_timeout_returns_false_promptly() {
        let queue = Arc::new(RtEventFifo::new());
        let mut receiver = AsyncEventReceiver::new(queue);

        let start = Instant::now();
        assert!(!receiver.wait_for_response(EventId(1003), Duration::from_millis(10)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[test]
    fn test_unmatched_completions_are_retained_for_other_waiters() {
        let queue = Arc::new(RtEventFifo::new());
        let mut receiver = AsyncEventReceiver::new(queue.clone());

        let early = EventId(2001);
        let late = EventId(2002);
        queue.push(RtEvent::async_work_completion(
            ObjectId::NONE,
            early,
            AsyncWorkStatus::Completed,
        ));
        queue.push(RtEvent::async_work_completion(
            ObjectId::NONE,
            late,
            AsyncWorkStatus::Completed,
        ));

        // Waiting on the later id must not eat the earlier completion
        assert!(receiver.wait_for_response(late, Duration::from_millis(10)));
        assert!(receiver.wait_for_response(early, Duration::from_millis(10)));
    }

    #[test]
    fn test_response_arriving_from_another_thread() {
        let queue = Arc::new(RtEventFifo::new());
        let mut receiver = AsyncEventReceiver::new(queue.clone());

        let id = EventId(3001);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            producer.push(RtEvent::async_work_completion(
                ObjectId::NONE,
                id,
                AsyncWorkStatus::Completed,
            ));
        });

        assert!(receiver.wait_for_response(id, Duration::from_millis(500)));
        handle.join().unwrap();
    }
}
