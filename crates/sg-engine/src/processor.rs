//! The processor contract
//!
//! Everything that produces or transforms audio in the graph implements
//! [`Processor`]: internal plugins, external plugin wrappers and tracks
//! themselves. Common bookkeeping (id, channel config, bypass, parameters,
//! event output) lives in [`ProcessorData`], which every implementation
//! embeds and exposes through `data()`/`data_mut()`; the trait's default
//! methods are implemented on top of it.

use std::sync::Arc;

use sg_core::{
    next_object_id, ChunkSampleBuffer, EngineError, EngineResult, ObjectId, ParameterPreProcessor,
    ParameterTable, ParameterValue, RtEvent, RtEventPipe,
};

/// Non-owning handle a processor publishes RT events through.
///
/// The sink outlives the processor by construction: tracks own processors,
/// never the other way around.
pub type RtEventSink = Arc<dyn RtEventPipe>;

/// Common state shared by every processor implementation
pub struct ProcessorData {
    id: ObjectId,
    name: String,
    label: String,
    max_input_channels: usize,
    max_output_channels: usize,
    input_channels: usize,
    output_channels: usize,
    bypassed: bool,
    /// Set once the processor enters the live graph; parameter registration
    /// is forbidden from then on
    active: bool,
    parameters: ParameterTable,
    event_output: Option<RtEventSink>,
}

impl ProcessorData {
    pub fn new(max_input_channels: usize, max_output_channels: usize) -> Self {
        Self {
            id: next_object_id(),
            name: String::new(),
            label: String::new(),
            max_input_channels,
            max_output_channels,
            input_channels: max_input_channels,
            output_channels: max_output_channels,
            bypassed: false,
            active: false,
            parameters: ParameterTable::new(),
            event_output: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    #[inline]
    pub fn max_input_channels(&self) -> usize {
        self.max_input_channels
    }

    #[inline]
    pub fn max_output_channels(&self) -> usize {
        self.max_output_channels
    }

    #[inline]
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn set_input_channels(&mut self, channels: usize) {
        debug_assert!(channels <= self.max_input_channels);
        self.input_channels = channels.min(self.max_input_channels);
    }

    pub fn set_output_channels(&mut self, channels: usize) {
        debug_assert!(channels <= self.max_output_channels);
        self.output_channels = channels.min(self.max_output_channels);
    }

    pub fn set_channel_limits(&mut self, max_input: usize, max_output: usize) {
        self.max_input_channels = max_input;
        self.max_output_channels = max_output;
        self.input_channels = self.input_channels.min(max_input);
        self.output_channels = self.output_channels.min(max_output);
    }

    #[inline]
    pub fn bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn set_event_output(&mut self, sink: Option<RtEventSink>) {
        self.event_output = sink;
    }

    /// Publish an RT event upstream. Returns `false` if no sink is installed
    /// or the sink is full; the event is dropped in both cases.
    #[inline]
    pub fn output_event(&self, event: RtEvent) -> bool {
        match &self.event_output {
            Some(sink) => sink.send_event(event),
            None => false,
        }
    }

    pub fn parameters(&self) -> &ParameterTable {
        &self.parameters
    }

    /// Update a parameter's live value from an incoming RT event
    #[inline]
    pub fn set_parameter_from_event(&self, event: &sg_core::ParameterChangeRtEvent) -> bool {
        self.parameters.set_value(event.parameter_id, event.value)
    }

    fn check_registration_allowed(&self) -> EngineResult<()> {
        if self.active {
            return Err(EngineError::InvalidParameter);
        }
        Ok(())
    }

    pub fn register_float_parameter(
        &mut self,
        name: &str,
        label: &str,
        default_value: f32,
        min_value: f32,
        max_value: f32,
        pre_processor: ParameterPreProcessor,
    ) -> EngineResult<Arc<ParameterValue>> {
        self.check_registration_allowed()?;
        self.parameters.register_float_parameter(
            name,
            label,
            default_value,
            min_value,
            max_value,
            pre_processor,
        )
    }

    pub fn register_int_parameter(
        &mut self,
        name: &str,
        label: &str,
        default_value: i32,
        min_value: i32,
        max_value: i32,
    ) -> EngineResult<Arc<ParameterValue>> {
        self.check_registration_allowed()?;
        self.parameters
            .register_int_parameter(name, label, default_value, min_value, max_value)
    }

    pub fn register_bool_parameter(
        &mut self,
        name: &str,
        label: &str,
        default_value: bool,
    ) -> EngineResult<Arc<ParameterValue>> {
        self.check_registration_allowed()?;
        self.parameters
            .register_bool_parameter(name, label, default_value)
    }

    pub fn register_string_property(&mut self, name: &str, label: &str) -> EngineResult<ObjectId> {
        self.check_registration_allowed()?;
        self.parameters.register_string_property(name, label)
    }
}

/// An audio unit in the graph.
///
/// `process_audio` and `process_event` run on the audio thread and must not
/// allocate, block or perform syscalls. Everything else is control-side.
pub trait Processor: Send {
    fn data(&self) -> &ProcessorData;
    fn data_mut(&mut self) -> &mut ProcessorData;

    /// One-time initialisation before entering the graph; may allocate
    fn init(&mut self, _sample_rate: f32) -> EngineResult<()> {
        Ok(())
    }

    /// Idempotent reconfiguration for a new sample rate; may allocate
    fn configure(&mut self, _sample_rate: f32) {}

    /// Process one audio chunk. `input` carries `input_channels()` channels
    /// and `output` carries `output_channels()` channels.
    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer);

    /// Receive one RT event, delivered before or between audio chunks
    fn process_event(&mut self, event: RtEvent) {
        if let RtEvent::ParameterChange(e) = event {
            self.data().set_parameter_from_event(&e);
        }
    }

    fn set_input_channels(&mut self, channels: usize) {
        self.data_mut().set_input_channels(channels);
    }

    fn set_output_channels(&mut self, channels: usize) {
        self.data_mut().set_output_channels(channels);
    }

    /// Bypass passes input through unchanged; implementations may provide a
    /// soft bypass instead
    fn set_bypassed(&mut self, bypassed: bool) {
        self.data_mut().set_bypassed(bypassed);
    }

    // Convenience accessors so call sites read like the graph code wants to

    fn id(&self) -> ObjectId {
        self.data().id()
    }

    fn input_channels(&self) -> usize {
        self.data().input_channels()
    }

    fn output_channels(&self) -> usize {
        self.data().output_channels()
    }

    fn max_input_channels(&self) -> usize {
        self.data().max_input_channels()
    }

    fn max_output_channels(&self) -> usize {
        self.data().max_output_channels()
    }

    fn is_bypassed(&self) -> bool {
        self.data().bypassed()
    }

    fn set_event_output(&mut self, sink: Option<RtEventSink>) {
        self.data_mut().set_event_output(sink);
    }
}

/// Copy input to output over the common channel subset and silence any
/// remaining output channels. The default bypass behavior.
pub fn bypass_process(input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
    let common = input.channel_count().min(output.channel_count());
    for ch in 0..common {
        let view = ChunkSampleBuffer::create_non_owning_buffer(input, ch, 1);
        let mut out_view = ChunkSampleBuffer::create_non_owning_buffer(output, ch, 1);
        out_view.replace(&view);
    }
    for ch in common..output.channel_count() {
        output.channel_mut(ch).fill(0.0);
    }
}
