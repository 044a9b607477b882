//! Non-real-time events and the poster interface
//!
//! [`Event`] is the heap-allocated message that travels on the control-side
//! event bus: a header (id, receiver, timestamp, optional completion
//! callback) plus a typed body. Events addressed to the audio engine are
//! translated into [`RtEvent`]s at the RT boundary; everything else is
//! delivered to a registered [`EventPoster`].

use std::time::Instant;

use sg_core::{
    next_event_id, AsyncWorkCallback, AsyncWorkStatus, EventId, MidiData, ObjectId, PlayingMode,
    RtEvent, SyncMode, TimeSignature,
};

/// Outcome reported for a processed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    HandledOk,
    QueuedHandling,
    UnrecognizedReceiver,
    UnrecognizedEvent,
    QueueFull,
    Error,
}

/// Invoked exactly once when an event's handling has finished
pub type EventCompletionCallback = Box<dyn FnOnce(EventId, EventStatus) + Send>;

/// Named participants on the control-side event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosterId {
    AudioEngine,
    MidiDispatcher,
    OscFrontend,
    RpcFrontend,
    Worker,
}

/// A participant that can receive events from the dispatcher.
///
/// Delivery happens on the dispatcher thread; posters must not block for
/// long. The dispatcher invokes the event's completion callback with the
/// returned status after `process_event` returns.
pub trait EventPoster: Send {
    fn poster_id(&self) -> PosterId;
    fn process_event(&mut self, event: &mut Event) -> EventStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardEventKind {
    NoteOn,
    NoteOff,
    NoteAftertouch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardEvent {
    pub kind: KeyboardEventKind,
    pub track_id: ObjectId,
    pub note: u8,
    pub velocity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChangeEvent {
    pub processor_id: ObjectId,
    pub parameter_id: ObjectId,
    pub value: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AsyncWorkEvent {
    pub processor_id: ObjectId,
    pub rt_event_id: EventId,
    pub callback: AsyncWorkCallback,
}

/// Typed payload of a non-RT event
pub enum EventBody {
    Keyboard(KeyboardEvent),
    WrappedMidi {
        track_id: ObjectId,
        midi_data: MidiData,
    },
    ParameterChange(ParameterChangeEvent),
    StringPropertyChange {
        processor_id: ObjectId,
        property_id: ObjectId,
        value: String,
    },
    SetTempo(f32),
    SetTimeSignature(TimeSignature),
    SetPlayingMode(PlayingMode),
    SetSyncMode(SyncMode),
    StopEngine,
    /// Blocking work requested by a processor, to run on a worker thread
    AsyncWork(AsyncWorkEvent),
    /// Result of finished worker-thread work, to be returned to the
    /// requesting processor
    AsyncWorkCompletion {
        processor_id: ObjectId,
        rt_event_id: EventId,
        status: AsyncWorkStatus,
    },
    /// RT-originated parameter change, for frontends mirroring engine state
    ParameterChangeNotification(ParameterChangeEvent),
    /// Keyboard event forwarded out of the graph by a track
    KeyboardNotification(KeyboardEvent),
}

/// Control-side event record
pub struct Event {
    id: EventId,
    receiver: PosterId,
    time: Instant,
    pub(crate) completion_callback: Option<EventCompletionCallback>,
    pub(crate) body: EventBody,
}

impl Event {
    pub fn new(receiver: PosterId, body: EventBody) -> Self {
        Self {
            id: next_event_id(),
            receiver,
            time: Instant::now(),
            completion_callback: None,
            body,
        }
    }

    pub fn with_completion_callback(mut self, callback: EventCompletionCallback) -> Self {
        self.completion_callback = Some(callback);
        self
    }

    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[inline]
    pub fn receiver(&self) -> PosterId {
        self.receiver
    }

    #[inline]
    pub fn time(&self) -> Instant {
        self.time
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    /// Whether this event crosses to the audio thread as an RT event
    pub fn maps_to_rt_event(&self) -> bool {
        matches!(
            self.body,
            EventBody::Keyboard(_)
                | EventBody::WrappedMidi { .. }
                | EventBody::ParameterChange(_)
                | EventBody::StringPropertyChange { .. }
                | EventBody::SetTempo(_)
                | EventBody::SetTimeSignature(_)
                | EventBody::SetPlayingMode(_)
                | EventBody::SetSyncMode(_)
                | EventBody::StopEngine
                | EventBody::AsyncWorkCompletion { .. }
        )
    }

    /// Translate into the RT representation.
    ///
    /// String property changes hand ownership of their heap string to the
    /// returned event; the engine ships the pointer back for deallocation
    /// after delivery.
    pub(crate) fn to_rt_event(&mut self, sample_offset: u32) -> Option<RtEvent> {
        match &mut self.body {
            EventBody::Keyboard(e) => Some(match e.kind {
                KeyboardEventKind::NoteOn => {
                    RtEvent::note_on(e.track_id, sample_offset, e.note, e.velocity)
                }
                KeyboardEventKind::NoteOff => {
                    RtEvent::note_off(e.track_id, sample_offset, e.note, e.velocity)
                }
                KeyboardEventKind::NoteAftertouch => {
                    RtEvent::note_aftertouch(e.track_id, sample_offset, e.note, e.velocity)
                }
            }),
            EventBody::WrappedMidi {
                track_id,
                midi_data,
            } => Some(RtEvent::wrapped_midi(*track_id, sample_offset, *midi_data)),
            EventBody::ParameterChange(e) => Some(RtEvent::parameter_change(
                e.processor_id,
                sample_offset,
                e.parameter_id,
                e.value,
            )),
            EventBody::StringPropertyChange {
                processor_id,
                property_id,
                value,
            } => {
                let boxed = Box::new(std::mem::take(value));
                Some(RtEvent::string_property_change(
                    *processor_id,
                    sample_offset,
                    *property_id,
                    Box::into_raw(boxed) as *const String,
                ))
            }
            EventBody::SetTempo(tempo) => Some(RtEvent::tempo_change(sample_offset, *tempo)),
            EventBody::SetTimeSignature(signature) => {
                Some(RtEvent::time_signature_change(sample_offset, *signature))
            }
            EventBody::SetPlayingMode(mode) => {
                Some(RtEvent::playing_mode_change(sample_offset, *mode))
            }
            EventBody::SetSyncMode(mode) => Some(RtEvent::sync_mode_change(sample_offset, *mode)),
            EventBody::StopEngine => Some(RtEvent::stop_engine(self.id)),
            EventBody::AsyncWorkCompletion {
                processor_id,
                rt_event_id,
                status,
            } => Some(RtEvent::async_work_completion(
                *processor_id,
                *rt_event_id,
                *status,
            )),
            _ => None,
        }
    }

    /// Invoke the completion callback, if any. Safe to call more than once;
    /// only the first call has an effect.
    pub(crate) fn complete(&mut self, status: EventStatus) {
        if let Some(callback) = self.completion_callback.take() {
            callback(self.id, status);
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("receiver", &self.receiver)
            .field("has_completion", &self.completion_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_keyboard_event_maps_to_rt() {
        let mut event = Event::new(
            PosterId::AudioEngine,
            EventBody::Keyboard(KeyboardEvent {
                kind: KeyboardEventKind::NoteOn,
                track_id: ObjectId(7),
                note: 60,
                velocity: 0.9,
            }),
        );

        assert!(event.maps_to_rt_event());
        match event.to_rt_event(12) {
            Some(RtEvent::NoteOn(e)) => {
                assert_eq!(e.processor_id, ObjectId(7));
                assert_eq!(e.sample_offset, 12);
                assert_eq!(e.note, 60);
            }
            other => panic!("unexpected translation: {:?}", other),
        }
    }

    #[test]
    fn test_notification_does_not_map_to_rt() {
        let event = Event::new(
            PosterId::OscFrontend,
            EventBody::ParameterChangeNotification(ParameterChangeEvent {
                processor_id: ObjectId(1),
                parameter_id: ObjectId(2),
                value: 0.5,
            }),
        );
        assert!(!event.maps_to_rt_event());
    }

    #[test]
    fn test_completion_runs_once() {
        let fired = Arc::new(AtomicBool::new(false));
        let observer = fired.clone();
        let mut event = Event::new(PosterId::AudioEngine, EventBody::SetTempo(140.0))
            .with_completion_callback(Box::new(move |_, status| {
                assert_eq!(status, EventStatus::HandledOk);
                observer.store(true, Ordering::SeqCst);
            }));

        event.complete(EventStatus::HandledOk);
        assert!(fired.load(Ordering::SeqCst));
        // Second call is a no-op
        event.complete(EventStatus::Error);
    }

    #[test]
    fn test_string_property_transfers_ownership() {
        let mut event = Event::new(
            PosterId::AudioEngine,
            EventBody::StringPropertyChange {
                processor_id: ObjectId(3),
                property_id: ObjectId(4),
                value: "sample.wav".to_string(),
            },
        );

        match event.to_rt_event(0) {
            Some(RtEvent::StringPropertyChange(e)) => {
                // SAFETY: the test takes the ownership the engine normally
                // takes after delivery
                let value = unsafe { Box::from_raw(e.value as *mut String) };
                assert_eq!(*value, "sample.wav");
            }
            other => panic!("unexpected translation: {:?}", other),
        }
    }
}
