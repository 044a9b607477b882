//! Real-time event records
//!
//! [`RtEvent`] is the only message type that crosses onto the audio thread.
//! Every variant is a small `Copy` record so events can live in lock-free
//! FIFOs and be passed by value with no allocation. The whole union is kept
//! within a cache line.

use crate::{EventId, ObjectId, PlayingMode, Sample, SyncMode, TimeSignature};

/// Raw MIDI message as carried inside a wrapped MIDI event
pub type MidiData = [u8; 4];

/// Function run on a worker thread on behalf of a processor.
///
/// Plain function pointer so the record stays trivially copyable; any state
/// the callback needs must be reachable from the processor id.
pub type AsyncWorkCallback = fn(processor_id: ObjectId, event_id: EventId) -> AsyncWorkStatus;

/// Outcome of an asynchronous work job or an engine command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AsyncWorkStatus {
    Completed = 0,
    Failed = 1,
}

/// Note on/off/aftertouch payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub note: u8,
    pub velocity: Sample,
}

/// Raw MIDI message addressed to a processor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WrappedMidiRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub midi_data: MidiData,
}

/// Parameter change, both directions: control → processor updates and
/// processor → control notifications (e.g. meter levels)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChangeRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub parameter_id: ObjectId,
    pub value: Sample,
}

/// String property change.
///
/// The string is heap-allocated on the control side and ownership travels
/// with the event: the pointer is valid only while the event is being
/// delivered, after which the engine ships it back to the control thread for
/// deallocation. Receivers must copy what they need during `process_event`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StringPropertyRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub property_id: ObjectId,
    pub value: *const String,
}

// SAFETY: the pointed-to string is immutable while the event is in flight
// and exactly one thread touches it at a time (see ownership protocol above)
unsafe impl Send for StringPropertyRtEvent {}

/// Request to run `callback` on a worker thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsyncWorkRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub event_id: EventId,
    pub callback: AsyncWorkCallback,
}

/// Completion of an asynchronous job or acknowledgement of an engine command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsyncWorkCompletionRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub event_id: EventId,
    pub status: AsyncWorkStatus,
}

/// Transport value change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub tempo: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSignatureRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub time_signature: TimeSignature,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayingModeRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub mode: PlayingMode,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncModeRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub mode: SyncMode,
}

/// Engine control payload (stop), acknowledged through the reply FIFO
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineControlRtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub event_id: EventId,
}

/// Event record deliverable to the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtEvent {
    NoteOn(KeyboardRtEvent),
    NoteOff(KeyboardRtEvent),
    NoteAftertouch(KeyboardRtEvent),
    WrappedMidi(WrappedMidiRtEvent),
    ParameterChange(ParameterChangeRtEvent),
    StringPropertyChange(StringPropertyRtEvent),
    AsyncWork(AsyncWorkRtEvent),
    AsyncWorkCompletion(AsyncWorkCompletionRtEvent),
    TempoChange(TempoRtEvent),
    TimeSignatureChange(TimeSignatureRtEvent),
    PlayingModeChange(PlayingModeRtEvent),
    SyncModeChange(SyncModeRtEvent),
    StopEngine(EngineControlRtEvent),
}

// The record must stay trivially copyable and within a cache line
const _: () = assert!(std::mem::size_of::<RtEvent>() <= 64);

impl RtEvent {
    pub fn note_on(processor_id: ObjectId, sample_offset: u32, note: u8, velocity: Sample) -> Self {
        Self::NoteOn(KeyboardRtEvent {
            processor_id,
            sample_offset,
            note,
            velocity,
        })
    }

    pub fn note_off(processor_id: ObjectId, sample_offset: u32, note: u8, velocity: Sample) -> Self {
        Self::NoteOff(KeyboardRtEvent {
            processor_id,
            sample_offset,
            note,
            velocity,
        })
    }

    pub fn note_aftertouch(
        processor_id: ObjectId,
        sample_offset: u32,
        note: u8,
        velocity: Sample,
    ) -> Self {
        Self::NoteAftertouch(KeyboardRtEvent {
            processor_id,
            sample_offset,
            note,
            velocity,
        })
    }

    pub fn wrapped_midi(processor_id: ObjectId, sample_offset: u32, midi_data: MidiData) -> Self {
        Self::WrappedMidi(WrappedMidiRtEvent {
            processor_id,
            sample_offset,
            midi_data,
        })
    }

    pub fn parameter_change(
        processor_id: ObjectId,
        sample_offset: u32,
        parameter_id: ObjectId,
        value: Sample,
    ) -> Self {
        Self::ParameterChange(ParameterChangeRtEvent {
            processor_id,
            sample_offset,
            parameter_id,
            value,
        })
    }

    pub fn string_property_change(
        processor_id: ObjectId,
        sample_offset: u32,
        property_id: ObjectId,
        value: *const String,
    ) -> Self {
        Self::StringPropertyChange(StringPropertyRtEvent {
            processor_id,
            sample_offset,
            property_id,
            value,
        })
    }

    pub fn async_work(
        processor_id: ObjectId,
        sample_offset: u32,
        event_id: EventId,
        callback: AsyncWorkCallback,
    ) -> Self {
        Self::AsyncWork(AsyncWorkRtEvent {
            processor_id,
            sample_offset,
            event_id,
            callback,
        })
    }

    pub fn async_work_completion(
        processor_id: ObjectId,
        event_id: EventId,
        status: AsyncWorkStatus,
    ) -> Self {
        Self::AsyncWorkCompletion(AsyncWorkCompletionRtEvent {
            processor_id,
            sample_offset: 0,
            event_id,
            status,
        })
    }

    pub fn tempo_change(sample_offset: u32, tempo: f32) -> Self {
        Self::TempoChange(TempoRtEvent {
            processor_id: ObjectId::NONE,
            sample_offset,
            tempo,
        })
    }

    pub fn time_signature_change(sample_offset: u32, time_signature: TimeSignature) -> Self {
        Self::TimeSignatureChange(TimeSignatureRtEvent {
            processor_id: ObjectId::NONE,
            sample_offset,
            time_signature,
        })
    }

    pub fn playing_mode_change(sample_offset: u32, mode: PlayingMode) -> Self {
        Self::PlayingModeChange(PlayingModeRtEvent {
            processor_id: ObjectId::NONE,
            sample_offset,
            mode,
        })
    }

    pub fn sync_mode_change(sample_offset: u32, mode: SyncMode) -> Self {
        Self::SyncModeChange(SyncModeRtEvent {
            processor_id: ObjectId::NONE,
            sample_offset,
            mode,
        })
    }

    pub fn stop_engine(event_id: EventId) -> Self {
        Self::StopEngine(EngineControlRtEvent {
            processor_id: ObjectId::NONE,
            sample_offset: 0,
            event_id,
        })
    }

    /// Target processor of this event
    pub fn processor_id(&self) -> ObjectId {
        match self {
            Self::NoteOn(e) | Self::NoteOff(e) | Self::NoteAftertouch(e) => e.processor_id,
            Self::WrappedMidi(e) => e.processor_id,
            Self::ParameterChange(e) => e.processor_id,
            Self::StringPropertyChange(e) => e.processor_id,
            Self::AsyncWork(e) => e.processor_id,
            Self::AsyncWorkCompletion(e) => e.processor_id,
            Self::TempoChange(e) => e.processor_id,
            Self::TimeSignatureChange(e) => e.processor_id,
            Self::PlayingModeChange(e) => e.processor_id,
            Self::SyncModeChange(e) => e.processor_id,
            Self::StopEngine(e) => e.processor_id,
        }
    }

    /// Offset into the current audio chunk, in `[0, AUDIO_CHUNK_SIZE)`
    pub fn sample_offset(&self) -> u32 {
        match self {
            Self::NoteOn(e) | Self::NoteOff(e) | Self::NoteAftertouch(e) => e.sample_offset,
            Self::WrappedMidi(e) => e.sample_offset,
            Self::ParameterChange(e) => e.sample_offset,
            Self::StringPropertyChange(e) => e.sample_offset,
            Self::AsyncWork(e) => e.sample_offset,
            Self::AsyncWorkCompletion(e) => e.sample_offset,
            Self::TempoChange(e) => e.sample_offset,
            Self::TimeSignatureChange(e) => e.sample_offset,
            Self::PlayingModeChange(e) => e.sample_offset,
            Self::SyncModeChange(e) => e.sample_offset,
            Self::StopEngine(e) => e.sample_offset,
        }
    }

    /// True for the note/MIDI family that tracks queue for their chain
    pub fn is_keyboard_event(&self) -> bool {
        matches!(
            self,
            Self::NoteOn(_) | Self::NoteOff(_) | Self::NoteAftertouch(_) | Self::WrappedMidi(_)
        )
    }

    /// Copy of this event readdressed to `processor_id`.
    ///
    /// Used by tracks when forwarding unconsumed keyboard events upstream
    /// under their own id.
    pub fn with_processor_id(mut self, processor_id: ObjectId) -> Self {
        match &mut self {
            Self::NoteOn(e) | Self::NoteOff(e) | Self::NoteAftertouch(e) => {
                e.processor_id = processor_id
            }
            Self::WrappedMidi(e) => e.processor_id = processor_id,
            Self::ParameterChange(e) => e.processor_id = processor_id,
            Self::StringPropertyChange(e) => e.processor_id = processor_id,
            Self::AsyncWork(e) => e.processor_id = processor_id,
            Self::AsyncWorkCompletion(e) => e.processor_id = processor_id,
            Self::TempoChange(e) => e.processor_id = processor_id,
            Self::TimeSignatureChange(e) => e.processor_id = processor_id,
            Self::PlayingModeChange(e) => e.processor_id = processor_id,
            Self::SyncModeChange(e) => e.processor_id = processor_id,
            Self::StopEngine(e) => e.processor_id = processor_id,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::next_object_id;

    #[test]
    fn test_event_creation_and_accessors() {
        let id = next_object_id();
        let event = RtEvent::note_on(id, 25, 60, 1.0);

        assert_eq!(event.processor_id(), id);
        assert_eq!(event.sample_offset(), 25);
        assert!(event.is_keyboard_event());
        match event {
            RtEvent::NoteOn(e) => {
                assert_eq!(e.note, 60);
                assert_eq!(e.velocity, 1.0);
            }
            _ => panic!("expected a note on event"),
        }
    }

    #[test]
    fn test_readdressing_keeps_payload() {
        let from = next_object_id();
        let to = next_object_id();
        let event = RtEvent::note_off(from, 12, 64, 0.5).with_processor_id(to);

        assert_eq!(event.processor_id(), to);
        assert_eq!(event.sample_offset(), 12);
        match event {
            RtEvent::NoteOff(e) => assert_eq!(e.note, 64),
            _ => panic!("expected a note off event"),
        }
    }

    #[test]
    fn test_transport_events_are_unaddressed() {
        let event = RtEvent::tempo_change(0, 128.0);
        assert_eq!(event.processor_id(), ObjectId::NONE);
        assert!(!event.is_keyboard_event());
    }
}
