//! The narrow control surface exposed to frontends
//!
//! OSC, MIDI mapping and RPC layers all drive the engine exclusively through
//! [`HostControl`]; nothing else of the engine's internals is visible to
//! them. Every operation is control-side, may allocate, and returns a
//! status the frontend can translate into its own diagnostics.

use sg_core::{
    EngineResult, ObjectId, ParameterDescriptor, PlayingMode, SyncMode, TimeSignature,
};

/// Plugin implementation flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Internal,
    Vst2x,
    Vst3x,
}

/// Summary of a registered processor
#[derive(Debug, Clone)]
pub struct ProcessorInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    /// Track this processor sits on; `None` for tracks themselves
    pub track: Option<ObjectId>,
}

/// Summary of a registered track
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub id: ObjectId,
    pub name: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub input_busses: usize,
    pub output_busses: usize,
    pub processors: Vec<ObjectId>,
}

/// Host-control operations consumed by frontends
pub trait HostControl {
    fn create_track(&mut self, name: &str, channels: usize) -> EngineResult<ObjectId>;

    fn create_multibus_track(
        &mut self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> EngineResult<ObjectId>;

    fn delete_track(&mut self, name: &str) -> EngineResult<()>;

    fn add_plugin_to_track(
        &mut self,
        track_name: &str,
        uid: &str,
        name: &str,
        path: &str,
        plugin_type: PluginType,
    ) -> EngineResult<ObjectId>;

    fn remove_plugin_from_track(&mut self, track_name: &str, plugin_name: &str)
        -> EngineResult<()>;

    fn connect_audio_input_channel(
        &mut self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()>;

    fn connect_audio_output_channel(
        &mut self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()>;

    fn connect_audio_input_bus(
        &mut self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()>;

    fn connect_audio_output_bus(
        &mut self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()>;

    /// Reconfigure the graph for a new sample rate. Only permitted while
    /// real-time processing is not running.
    fn set_sample_rate(&mut self, sample_rate: f32) -> EngineResult<()>;

    fn set_tempo(&mut self, tempo: f32) -> EngineResult<()>;

    fn set_time_signature(&mut self, signature: TimeSignature) -> EngineResult<()>;

    fn set_transport_mode(&mut self, mode: PlayingMode) -> EngineResult<()>;

    fn set_tempo_sync_mode(&mut self, mode: SyncMode) -> EngineResult<()>;

    fn set_parameter_value(
        &mut self,
        processor_name: &str,
        parameter_name: &str,
        value: f32,
    ) -> EngineResult<()>;

    fn parameter_value(&self, processor_name: &str, parameter_name: &str) -> EngineResult<f32>;

    fn parameter_list(&self, processor_name: &str) -> EngineResult<Vec<ParameterDescriptor>>;

    fn send_note_on(&mut self, track_name: &str, note: u8, velocity: f32) -> EngineResult<()>;

    fn send_note_off(&mut self, track_name: &str, note: u8, velocity: f32) -> EngineResult<()>;

    fn processor_id_from_name(&self, name: &str) -> EngineResult<ObjectId>;

    fn processor_list(&self) -> Vec<ProcessorInfo>;

    fn track_list(&self) -> Vec<TrackInfo>;
}
