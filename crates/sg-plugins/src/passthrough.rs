//! Identity plugin
//!
//! Copies input to output and passes keyboard events straight on, which
//! makes it the building block for MIDI-thru style routing and a convenient
//! unit for exercising a chain.

use sg_core::{ChunkSampleBuffer, RtEvent};
use sg_engine::{bypass_process, Processor, ProcessorData};

pub const PASSTHROUGH_PLUGIN_UID: &str = "sg.passthrough";

const MAX_CHANNELS: usize = 2;

pub struct PassthroughPlugin {
    data: ProcessorData,
}

impl PassthroughPlugin {
    pub fn new() -> Self {
        Self {
            data: ProcessorData::new(MAX_CHANNELS, MAX_CHANNELS),
        }
    }
}

impl Default for PassthroughPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PassthroughPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        bypass_process(input, output);
    }

    fn process_event(&mut self, event: RtEvent) {
        if event.is_keyboard_event() {
            self.data.output_event(event);
        } else if let RtEvent::ParameterChange(e) = event {
            self.data.set_parameter_from_event(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::{ObjectId, RtEventFifo};
    use std::sync::Arc;

    #[test]
    fn test_audio_is_copied() {
        let mut plugin = PassthroughPlugin::new();
        let mut input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(0.25);
        input.channel_mut(1).fill(-0.25);

        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0)[0], 0.25);
        assert_eq!(output.channel(1)[0], -0.25);
    }

    #[test]
    fn test_keyboard_events_pass_through() {
        let mut plugin = PassthroughPlugin::new();
        let sink: Arc<RtEventFifo<16>> = Arc::new(RtEventFifo::new());
        plugin.set_event_output(Some(sink.clone()));

        plugin.process_event(RtEvent::note_on(ObjectId(1), 4, 60, 1.0));
        match sink.pop() {
            Some(RtEvent::NoteOn(e)) => assert_eq!(e.note, 60),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
