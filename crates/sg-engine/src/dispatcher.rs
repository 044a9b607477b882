//! Control-side event dispatcher
//!
//! Owns the non-RT event queue, the registered posters, and a small pool of
//! worker threads for blocking work. A single dispatcher thread drains the
//! queue and the RT-out FIFO:
//!
//! - events addressed to the audio engine are translated to [`RtEvent`]s and
//!   pushed onto the to-RT FIFO (the dispatcher thread is that FIFO's only
//!   producer),
//! - events addressed to a poster are delivered synchronously on the
//!   dispatcher thread, which preserves per-poster posting order,
//! - `ASYNC_WORK` requests coming out of the graph are scheduled on the
//!   worker pool, and their completions are routed back to the requesting
//!   processor through the to-RT FIFO.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use sg_core::{AsyncWorkCallback, EventId, ObjectId, RtEvent, RtEventFifo};

use crate::event::{
    Event, EventBody, EventPoster, EventStatus, KeyboardEvent, KeyboardEventKind,
    ParameterChangeEvent, PosterId,
};

/// Capacity of the non-RT event queue
pub const DISPATCH_QUEUE_CAPACITY: usize = 512;

const WORKER_QUEUE_CAPACITY: usize = 64;
const WORKER_THREAD_COUNT: usize = 2;
const TICK_INTERVAL: Duration = Duration::from_millis(1);

struct WorkerTask {
    callback: AsyncWorkCallback,
    processor_id: ObjectId,
    event_id: EventId,
}

/// Fixed pool of named worker threads servicing blocking work
struct WorkerPool {
    task_tx: Option<Sender<WorkerTask>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(completion_tx: Sender<Event>) -> Self {
        let (task_tx, task_rx) = bounded::<WorkerTask>(WORKER_QUEUE_CAPACITY);
        let mut threads = Vec::with_capacity(WORKER_THREAD_COUNT);

        for index in 0..WORKER_THREAD_COUNT {
            let task_rx = task_rx.clone();
            let completion_tx = completion_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("sg-worker-{}", index))
                .spawn(move || {
                    while let Ok(task) = task_rx.recv() {
                        let status = (task.callback)(task.processor_id, task.event_id);
                        let completion = Event::new(
                            PosterId::AudioEngine,
                            EventBody::AsyncWorkCompletion {
                                processor_id: task.processor_id,
                                rt_event_id: task.event_id,
                                status,
                            },
                        );
                        if completion_tx.send(completion).is_err() {
                            break;
                        }
                    }
                })
                .expect("Failed to spawn worker thread");
            threads.push(handle);
        }

        Self {
            task_tx: Some(task_tx),
            threads,
        }
    }

    fn sender(&self) -> Sender<WorkerTask> {
        self.task_tx.as_ref().expect("worker pool shut down").clone()
    }

    fn shutdown(&mut self) {
        self.task_tx = None;
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Shared state the dispatcher thread runs against
struct DispatcherContext {
    queue_rx: Receiver<Event>,
    running: Arc<AtomicBool>,
    to_rt: Arc<RtEventFifo>,
    rt_out: Arc<RtEventFifo>,
    posters: Arc<Mutex<HashMap<PosterId, Box<dyn EventPoster>>>>,
    worker_tx: Sender<WorkerTask>,
}

/// The non-RT event bus
pub struct EventDispatcher {
    queue_tx: Sender<Event>,
    queue_rx: Receiver<Event>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    worker_pool: WorkerPool,
    to_rt: Arc<RtEventFifo>,
    rt_out: Arc<RtEventFifo>,
    posters: Arc<Mutex<HashMap<PosterId, Box<dyn EventPoster>>>>,
}

impl EventDispatcher {
    pub fn new(to_rt: Arc<RtEventFifo>, rt_out: Arc<RtEventFifo>) -> Self {
        let (queue_tx, queue_rx) = bounded(DISPATCH_QUEUE_CAPACITY);
        let worker_pool = WorkerPool::new(queue_tx.clone());

        Self {
            queue_tx,
            queue_rx,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            worker_pool,
            to_rt,
            rt_out,
            posters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a poster as an event receiver. Replaces any previous poster
    /// with the same id.
    pub fn register_poster(&self, poster: Box<dyn EventPoster>) {
        let id = poster.poster_id();
        self.posters.lock().insert(id, poster);
        log::info!("Registered event poster {:?}", id);
    }

    pub fn deregister_poster(&self, id: PosterId) {
        self.posters.lock().remove(&id);
    }

    /// Queue an event for delivery. Returns `QueuedHandling` on success; on
    /// a full queue the event's completion callback fires with `QueueFull`
    /// before the call returns.
    pub fn post_event(&self, event: Event) -> EventStatus {
        match self.queue_tx.try_send(event) {
            Ok(()) => EventStatus::QueuedHandling,
            Err(TrySendError::Full(mut event)) => {
                log::warn!("Event queue full, dropping event {:?}", event.id());
                event.complete(EventStatus::QueueFull);
                EventStatus::QueueFull
            }
            Err(TrySendError::Disconnected(mut event)) => {
                event.complete(EventStatus::Error);
                EventStatus::Error
            }
        }
    }

    /// Push an event directly onto the to-RT FIFO.
    ///
    /// The FIFO is single-producer: call this only from the dispatcher
    /// thread, or before real-time processing has started.
    pub fn post_rt_event(&self, event: RtEvent) -> bool {
        self.to_rt.push(event)
    }

    /// Start the dispatcher thread. Idempotent.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let context = DispatcherContext {
            queue_rx: self.queue_rx.clone(),
            running: self.running.clone(),
            to_rt: self.to_rt.clone(),
            rt_out: self.rt_out.clone(),
            posters: self.posters.clone(),
            worker_tx: self.worker_pool.sender(),
        };

        let handle = thread::Builder::new()
            .name("sg-dispatcher".into())
            .spawn(move || {
                while context.running.load(Ordering::Relaxed) {
                    match context.queue_rx.recv_timeout(TICK_INTERVAL) {
                        Ok(event) => handle_event(&context, event),
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                    drain_rt_events(&context);
                }
                log::info!("Dispatcher thread exiting");
            })
            .expect("Failed to spawn dispatcher thread");

        self.thread = Some(handle);
        log::info!("Dispatcher thread started");
    }

    /// Stop the dispatcher thread and wait for it to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
        self.worker_pool.shutdown();
    }
}

fn handle_event(context: &DispatcherContext, mut event: Event) {
    match event.receiver() {
        PosterId::AudioEngine => {
            if !event.maps_to_rt_event() {
                event.complete(EventStatus::UnrecognizedEvent);
                return;
            }
            match event.to_rt_event(0) {
                Some(rt_event) => {
                    if context.to_rt.push(rt_event) {
                        event.complete(EventStatus::HandledOk);
                    } else {
                        // Backpressure: reclaim anything the translation
                        // leaked and report the drop
                        if let RtEvent::StringPropertyChange(e) = rt_event {
                            // SAFETY: the pointer was created by
                            // to_rt_event above and never reached the RT
                            // thread
                            unsafe { drop(Box::from_raw(e.value as *mut String)) };
                        }
                        log::warn!("to-RT queue full, dropping event {:?}", event.id());
                        event.complete(EventStatus::QueueFull);
                    }
                }
                None => event.complete(EventStatus::UnrecognizedEvent),
            }
        }
        PosterId::Worker => {
            if let EventBody::AsyncWork(work) = event.body() {
                let task = WorkerTask {
                    callback: work.callback,
                    processor_id: work.processor_id,
                    event_id: work.rt_event_id,
                };
                let status = if context.worker_tx.try_send(task).is_ok() {
                    EventStatus::QueuedHandling
                } else {
                    log::warn!("Worker queue full, dropping async work");
                    EventStatus::QueueFull
                };
                event.complete(status);
            } else {
                event.complete(EventStatus::UnrecognizedEvent);
            }
        }
        receiver => {
            let mut posters = context.posters.lock();
            match posters.get_mut(&receiver) {
                Some(poster) => {
                    let status = poster.process_event(&mut event);
                    event.complete(status);
                }
                None => {
                    log::warn!("No poster registered for {:?}", receiver);
                    event.complete(EventStatus::UnrecognizedReceiver);
                }
            }
        }
    }
}

/// Drain RT-originated events at the dispatcher tick
fn drain_rt_events(context: &DispatcherContext) {
    while let Some(rt_event) = context.rt_out.pop() {
        match rt_event {
            RtEvent::AsyncWork(e) => {
                let task = WorkerTask {
                    callback: e.callback,
                    processor_id: e.processor_id,
                    event_id: e.event_id,
                };
                if context.worker_tx.try_send(task).is_err() {
                    log::warn!(
                        "Worker queue full, dropping async work from {:?}",
                        e.processor_id
                    );
                }
            }
            RtEvent::ParameterChange(e) => {
                notify_posters(context, || {
                    EventBody::ParameterChangeNotification(ParameterChangeEvent {
                        processor_id: e.processor_id,
                        parameter_id: e.parameter_id,
                        value: e.value,
                    })
                });
            }
            RtEvent::NoteOn(e) | RtEvent::NoteOff(e) | RtEvent::NoteAftertouch(e) => {
                let kind = match rt_event {
                    RtEvent::NoteOn(_) => KeyboardEventKind::NoteOn,
                    RtEvent::NoteOff(_) => KeyboardEventKind::NoteOff,
                    _ => KeyboardEventKind::NoteAftertouch,
                };
                notify_posters(context, || {
                    EventBody::KeyboardNotification(KeyboardEvent {
                        kind,
                        track_id: e.processor_id,
                        note: e.note,
                        velocity: e.velocity,
                    })
                });
            }
            // Wrapped MIDI and anything else coming out of the graph has no
            // control-side consumer yet
            _ => {}
        }
    }
}

fn notify_posters(context: &DispatcherContext, body: impl Fn() -> EventBody) {
    let mut posters = context.posters.lock();
    for (id, poster) in posters.iter_mut() {
        let mut event = Event::new(*id, body());
        poster.process_event(&mut event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::AsyncWorkStatus;
    use std::sync::atomic::AtomicUsize;

    struct RecordingPoster {
        id: PosterId,
        notifications: Arc<AtomicUsize>,
    }

    impl EventPoster for RecordingPoster {
        fn poster_id(&self) -> PosterId {
            self.id
        }

        fn process_event(&mut self, _event: &mut Event) -> EventStatus {
            self.notifications.fetch_add(1, Ordering::SeqCst);
            EventStatus::HandledOk
        }
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms * 10 {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_micros(100));
        }
        check()
    }

    #[test]
    fn test_engine_events_reach_the_rt_fifo() {
        let to_rt = Arc::new(RtEventFifo::new());
        let rt_out = Arc::new(RtEventFifo::new());
        let mut dispatcher = EventDispatcher::new(to_rt.clone(), rt_out);
        dispatcher.start();

        let status = dispatcher.post_event(Event::new(
            PosterId::AudioEngine,
            EventBody::SetTempo(150.0),
        ));
        assert_eq!(status, EventStatus::QueuedHandling);

        assert!(wait_until(100, || !to_rt.is_empty()));
        match to_rt.pop() {
            Some(RtEvent::TempoChange(e)) => assert_eq!(e.tempo, 150.0),
            other => panic!("unexpected event: {:?}", other),
        }
        dispatcher.stop();
    }

    #[test]
    fn test_poster_delivery_and_completion() {
        let to_rt = Arc::new(RtEventFifo::new());
        let rt_out = Arc::new(RtEventFifo::new());
        let mut dispatcher = EventDispatcher::new(to_rt, rt_out);

        let notifications = Arc::new(AtomicUsize::new(0));
        dispatcher.register_poster(Box::new(RecordingPoster {
            id: PosterId::OscFrontend,
            notifications: notifications.clone(),
        }));
        dispatcher.start();

        let completed = Arc::new(AtomicBool::new(false));
        let observer = completed.clone();
        let event = Event::new(
            PosterId::OscFrontend,
            EventBody::ParameterChangeNotification(ParameterChangeEvent {
                processor_id: ObjectId(1),
                parameter_id: ObjectId(2),
                value: 0.5,
            }),
        )
        .with_completion_callback(Box::new(move |_, status| {
            assert_eq!(status, EventStatus::HandledOk);
            observer.store(true, Ordering::SeqCst);
        }));

        dispatcher.post_event(event);
        assert!(wait_until(100, || completed.load(Ordering::SeqCst)));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        dispatcher.stop();
    }

    #[test]
    fn test_rt_async_work_round_trip() {
        fn work(_processor: ObjectId, _event: EventId) -> AsyncWorkStatus {
            AsyncWorkStatus::Completed
        }

        let to_rt = Arc::new(RtEventFifo::new());
        let rt_out = Arc::new(RtEventFifo::new());
        let mut dispatcher = EventDispatcher::new(to_rt.clone(), rt_out.clone());
        dispatcher.start();

        let processor_id = ObjectId(42);
        let event_id = EventId(777);
        rt_out.push(RtEvent::async_work(processor_id, 0, event_id, work));

        // The completion must come back addressed to the processor
        assert!(wait_until(500, || !to_rt.is_empty()));
        match to_rt.pop() {
            Some(RtEvent::AsyncWorkCompletion(e)) => {
                assert_eq!(e.processor_id, processor_id);
                assert_eq!(e.event_id, event_id);
                assert_eq!(e.status, AsyncWorkStatus::Completed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        dispatcher.stop();
    }

    #[test]
    fn test_rt_parameter_notifications_fan_out() {
        let to_rt = Arc::new(RtEventFifo::new());
        let rt_out = Arc::new(RtEventFifo::new());
        let mut dispatcher = EventDispatcher::new(to_rt, rt_out.clone());

        let notifications = Arc::new(AtomicUsize::new(0));
        dispatcher.register_poster(Box::new(RecordingPoster {
            id: PosterId::OscFrontend,
            notifications: notifications.clone(),
        }));
        dispatcher.start();

        rt_out.push(RtEvent::parameter_change(ObjectId(5), 0, ObjectId(6), 0.25));
        assert!(wait_until(100, || notifications.load(Ordering::SeqCst) == 1));
        dispatcher.stop();
    }
}
