//! Tracks: ordered processor chains with per-bus mixing
//!
//! A track is itself a processor, which is also why tracks cannot nest: a
//! track that added itself to its own chain would recurse forever, so
//! insertion guards against it. The track owns its child processors, queues
//! keyboard events for delivery at the head of the next chunk, negotiates
//! channel counts along the chain, and applies per-bus gain and pan after
//! the chain has run.

use std::sync::Arc;

use sg_core::{
    ChunkSampleBuffer, EngineError, EngineResult, ObjectId, ParameterPreProcessor, ParameterValue,
    RtEvent, RtEventFifo,
};

use crate::processor::{Processor, ProcessorData, RtEventSink};

/// Upper bound on processors per track chain
pub const TRACK_MAX_PROCESSORS: usize = 32;

/// Upper bound on input or output busses of a multibus track
pub const TRACK_MAX_BUSSES: usize = 8;

pub const LEFT_CHANNEL_INDEX: usize = 0;
pub const RIGHT_CHANNEL_INDEX: usize = 1;

/// Compensation used by the pan law so centre pan keeps unity gain while
/// full pan boosts the remaining channel by ~3 dB
pub const PAN_GAIN_3_DB: f32 = 0.292_893_22;

/// Capacity of the per-track keyboard event queue
const KEYBOARD_EVENT_QUEUE_CAPACITY: usize = 32;

/// Capacity of the sink child processors publish events into
pub const PROCESSOR_EVENT_SINK_CAPACITY: usize = 64;

/// Which buffer currently holds the newest signal while the chain rotates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainStage {
    /// The caller-provided input buffer (before any processor has run)
    External,
    /// The caller-provided output buffer
    Output,
    /// The track-internal scratch buffer
    Scratch,
}

/// Apply the equal-power-ish pan law and gain to a stereo buffer in place.
///
/// At centre pan both channels get `gain`; panning attenuates the far
/// channel linearly and boosts the near channel by up to 3 dB.
pub fn apply_pan_and_gain(buffer: &mut ChunkSampleBuffer, gain: f32, pan: f32) {
    let (left_gain, right_gain) = if pan < 0.0 {
        (
            gain * (1.0 + pan - PAN_GAIN_3_DB * pan),
            gain * (1.0 + pan),
        )
    } else {
        (
            gain * (1.0 - pan),
            gain * (1.0 - pan + PAN_GAIN_3_DB * pan),
        )
    };

    for sample in buffer.channel_mut(LEFT_CHANNEL_INDEX) {
        *sample *= left_gain;
    }
    for sample in buffer.channel_mut(RIGHT_CHANNEL_INDEX) {
        *sample *= right_gain;
    }
}

/// An ordered chain of processors with per-bus gain/pan and keyboard-event
/// forwarding
pub struct Track {
    data: ProcessorData,
    processors: Vec<Box<dyn Processor>>,
    input_buffer: ChunkSampleBuffer,
    output_buffer: ChunkSampleBuffer,
    scratch_buffer: ChunkSampleBuffer,
    input_busses: usize,
    output_busses: usize,
    multibus: bool,
    /// Keyboard events waiting for the next chunk
    keyboard_events: RtEventFifo<KEYBOARD_EVENT_QUEUE_CAPACITY>,
    /// Sink installed as every child processor's event output
    emitted_events: Arc<RtEventFifo<PROCESSOR_EVENT_SINK_CAPACITY>>,
    gain_parameters: Vec<Arc<ParameterValue>>,
    pan_parameters: Vec<Arc<ParameterValue>>,
}

impl Track {
    /// Create a simple mono or stereo track
    pub fn new(channels: usize) -> EngineResult<Self> {
        if channels == 0 || channels > 2 {
            return Err(EngineError::InvalidChannel);
        }
        let buffer_channels = channels.max(2);
        Self::build(channels, channels, buffer_channels, 1, 1, false)
    }

    /// Create a multibus track; every bus is a stereo channel pair
    pub fn new_multibus(input_busses: usize, output_busses: usize) -> EngineResult<Self> {
        if input_busses == 0
            || output_busses == 0
            || input_busses > TRACK_MAX_BUSSES
            || output_busses > TRACK_MAX_BUSSES
        {
            return Err(EngineError::InvalidBus);
        }
        let channels = input_busses.max(output_busses) * 2;
        Self::build(
            channels,
            channels,
            channels,
            input_busses,
            output_busses,
            input_busses > 1 || output_busses > 1,
        )
    }

    fn build(
        input_channels: usize,
        output_channels: usize,
        buffer_channels: usize,
        input_busses: usize,
        output_busses: usize,
        multibus: bool,
    ) -> EngineResult<Self> {
        let mut track = Self {
            data: ProcessorData::new(input_channels, output_channels),
            processors: Vec::with_capacity(TRACK_MAX_PROCESSORS),
            input_buffer: ChunkSampleBuffer::new(buffer_channels),
            output_buffer: ChunkSampleBuffer::new(buffer_channels),
            scratch_buffer: ChunkSampleBuffer::new(buffer_channels),
            input_busses,
            output_busses,
            multibus,
            keyboard_events: RtEventFifo::new(),
            emitted_events: Arc::new(RtEventFifo::new()),
            gain_parameters: Vec::with_capacity(output_busses),
            pan_parameters: Vec::with_capacity(output_busses),
        };

        for bus in 0..output_busses {
            let (gain_name, pan_name) = if bus == 0 {
                ("gain_main".to_string(), "pan_main".to_string())
            } else {
                (format!("gain_sub_{}", bus), format!("pan_sub_{}", bus))
            };
            let gain = track.data.register_float_parameter(
                &gain_name,
                "Gain",
                0.0,
                -120.0,
                24.0,
                ParameterPreProcessor::DbToLinear {
                    min: -120.0,
                    max: 24.0,
                },
            )?;
            let pan = track.data.register_float_parameter(
                &pan_name,
                "Pan",
                0.0,
                -1.0,
                1.0,
                ParameterPreProcessor::Clamp {
                    min: -1.0,
                    max: 1.0,
                },
            )?;
            track.gain_parameters.push(gain);
            track.pan_parameters.push(pan);
        }
        Ok(track)
    }

    pub fn input_busses(&self) -> usize {
        self.input_busses
    }

    pub fn output_busses(&self) -> usize {
        self.output_busses
    }

    pub fn is_multibus(&self) -> bool {
        self.multibus
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// The engine writes host input into this buffer before calling render
    pub fn input_buffer_mut(&mut self) -> &mut ChunkSampleBuffer {
        &mut self.input_buffer
    }

    /// Mixed track output after render
    pub fn output_buffer(&self) -> &ChunkSampleBuffer {
        &self.output_buffer
    }

    /// Look up a child processor by id
    pub fn processor_mut(&mut self, id: ObjectId) -> Option<&mut Box<dyn Processor>> {
        self.processors.iter_mut().find(|p| p.id() == id)
    }

    /// Append a processor to the chain.
    ///
    /// Rejects when the chain is full, when the processor is this track, or
    /// when it is already present; ownership travels back to the caller on
    /// rejection. On success the track installs itself as the processor's
    /// event output and renegotiates channel counts.
    pub fn add(&mut self, mut processor: Box<dyn Processor>) -> Result<(), Box<dyn Processor>> {
        if self.processors.len() >= TRACK_MAX_PROCESSORS {
            return Err(processor);
        }
        let id = processor.id();
        if id == self.data.id() || self.processors.iter().any(|p| p.id() == id) {
            return Err(processor);
        }

        processor.set_event_output(Some(self.emitted_events.clone() as RtEventSink));
        processor.data_mut().set_active(true);
        self.processors.push(processor);
        self.update_channel_config();
        Ok(())
    }

    /// Remove a processor from the chain, returning ownership to the caller
    pub fn remove(&mut self, processor_id: ObjectId) -> Option<Box<dyn Processor>> {
        let index = self.processors.iter().position(|p| p.id() == processor_id)?;
        let mut processor = self.processors.remove(index);
        processor.set_event_output(None);
        self.update_channel_config();
        Some(processor)
    }

    /// Negotiate channel counts along the chain.
    ///
    /// Each processor receives the widest feasible input from its
    /// predecessor, and its output is clamped by its own maximum, the
    /// track's maximum, and the next processor's input capability. The last
    /// processor is additionally clamped to the track's current output
    /// width. Reductions drop the highest-index channels.
    pub fn update_channel_config(&mut self) {
        let mut input_channels = self.data.input_channels();

        for i in 0..self.processors.len() {
            input_channels = input_channels.min(self.processors[i].max_input_channels());
            if input_channels != self.processors[i].input_channels() {
                self.processors[i].set_input_channels(input_channels);
            }

            let output_channels = if i < self.processors.len() - 1 {
                let next_max_input = self.processors[i + 1].max_input_channels();
                self.data
                    .max_output_channels()
                    .min(self.processors[i].max_output_channels())
                    .min(next_max_input)
            } else {
                self.data
                    .max_output_channels()
                    .min(self.processors[i].max_output_channels())
                    .min(self.data.output_channels())
            };
            if output_channels != self.processors[i].output_channels() {
                self.processors[i].set_output_channels(output_channels);
            }
            input_channels = output_channels;
        }

        if let Some(last) = self.processors.last_mut() {
            let track_outputs = self.data.output_channels().min(last.output_channels());
            if track_outputs != last.output_channels() {
                last.set_output_channels(track_outputs);
            }
        }
    }

    /// Run the chain over the track's own buffers, then apply per-bus gain
    /// and pan to the output
    pub fn render(&mut self) {
        let input = ChunkSampleBuffer::create_non_owning_buffer(
            &self.input_buffer,
            0,
            self.input_buffer.channel_count(),
        );
        let mut output = ChunkSampleBuffer::create_non_owning_buffer(
            &self.output_buffer,
            0,
            self.output_buffer.channel_count(),
        );
        self.process_audio_chain(&input, &mut output);

        for bus in 0..self.output_busses {
            let gain = self.gain_parameters[bus].value();
            let pan = self.pan_parameters[bus].value();
            let mut bus_buffer =
                ChunkSampleBuffer::create_non_owning_buffer(&self.output_buffer, bus * 2, 2);
            apply_pan_and_gain(&mut bus_buffer, gain, pan);
        }
    }

    fn process_audio_chain(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        let mut stage = ChainStage::External;

        for i in 0..self.processors.len() {
            // Queued keyboard events reach the processor before the samples
            // of the chunk they target
            while let Some(event) = self.keyboard_events.pop() {
                self.processors[i].process_event(event);
            }

            let next_stage = if stage == ChainStage::Output {
                ChainStage::Scratch
            } else {
                ChainStage::Output
            };
            let in_channels = self.processors[i].input_channels();
            let out_channels = self.processors[i].output_channels();

            let source = match stage {
                ChainStage::External => {
                    ChunkSampleBuffer::create_non_owning_buffer(input, 0, in_channels)
                }
                ChainStage::Output => {
                    ChunkSampleBuffer::create_non_owning_buffer(output, 0, in_channels)
                }
                ChainStage::Scratch => {
                    ChunkSampleBuffer::create_non_owning_buffer(&self.scratch_buffer, 0, in_channels)
                }
            };
            let mut destination = match next_stage {
                ChainStage::Scratch => ChunkSampleBuffer::create_non_owning_buffer(
                    &self.scratch_buffer,
                    0,
                    out_channels,
                ),
                _ => ChunkSampleBuffer::create_non_owning_buffer(output, 0, out_channels),
            };

            self.processors[i].process_audio(&source, &mut destination);
            self.route_emitted_events();
            stage = next_stage;
        }

        match stage {
            // No processors: the track passes its input through
            ChainStage::External => {
                let channels = self
                    .data
                    .output_channels()
                    .min(input.channel_count())
                    .min(output.channel_count());
                let source = ChunkSampleBuffer::create_non_owning_buffer(input, 0, channels);
                let mut destination =
                    ChunkSampleBuffer::create_non_owning_buffer(output, 0, channels);
                destination.replace(&source);
            }
            ChainStage::Output => {}
            ChainStage::Scratch => {
                let channels = self
                    .processors
                    .last()
                    .map(|p| p.output_channels())
                    .unwrap_or(0);
                let source =
                    ChunkSampleBuffer::create_non_owning_buffer(&self.scratch_buffer, 0, channels);
                let mut destination =
                    ChunkSampleBuffer::create_non_owning_buffer(output, 0, channels);
                destination.replace(&source);
            }
        }

        // Keyboard events no processor consumed are passed on upstream,
        // readdressed to the track itself
        let track_id = self.data.id();
        while let Some(event) = self.keyboard_events.pop() {
            self.data.output_event(event.with_processor_id(track_id));
        }
    }

    /// Route events published by child processors during the last process
    /// call: keyboard events feed the next processor in the chain, anything
    /// else goes upstream unchanged.
    fn route_emitted_events(&mut self) {
        while let Some(event) = self.emitted_events.pop() {
            if event.is_keyboard_event() {
                self.keyboard_events.push(event);
            } else {
                self.data.output_event(event);
            }
        }
    }
}

impl Processor for Track {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn configure(&mut self, sample_rate: f32) {
        for processor in &mut self.processors {
            processor.configure(sample_rate);
        }
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        self.process_audio_chain(input, output);
    }

    fn process_event(&mut self, event: RtEvent) {
        if event.is_keyboard_event() {
            // Cached so they can be passed to the chain at the next chunk
            self.keyboard_events.push(event);
        } else {
            self.data.output_event(event);
        }
    }

    fn set_input_channels(&mut self, channels: usize) {
        self.data.set_input_channels(channels);
        self.update_channel_config();
    }

    fn set_output_channels(&mut self, channels: usize) {
        self.data.set_output_channels(channels);
        self.update_channel_config();
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        for processor in &mut self.processors {
            processor.set_bypassed(bypassed);
        }
        self.data.set_bypassed(bypassed);
    }
}
