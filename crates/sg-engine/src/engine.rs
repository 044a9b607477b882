//! The audio engine
//!
//! Split into two halves around the RT boundary:
//!
//! - [`AudioEngine`] is the control half: it owns the processor registry,
//!   validates host-control operations, builds tracks and plugins, and talks
//!   to the audio side exclusively through lock-free rings.
//! - [`RtEngine`] is the audio half: it owns the live graph and runs the
//!   audio callback. It never allocates, never frees, never locks.
//!
//! Graph mutations are shipped as whole objects through a bounded command
//! ring and applied at the top of a chunk, so the audio thread observes
//! changes only at block boundaries and never follows a dangling pointer.
//! Everything removed from the live graph travels back whole on a second
//! ring and is dropped on a control thread. Each command is acknowledged
//! through the reply FIFO and awaited via [`AsyncEventReceiver`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

use sg_core::{
    next_event_id, AsyncWorkStatus, ChunkSampleBuffer, EngineError, EngineResult, EventId,
    ObjectId, ParameterDescriptor, ParameterValue, PlayingMode, RtEvent, RtEventFifo, Sample,
    SyncMode, TimeSignature, AUDIO_CHUNK_SIZE,
};

use crate::dispatcher::EventDispatcher;
use crate::event::{
    Event, EventBody, KeyboardEvent, KeyboardEventKind, ParameterChangeEvent, PosterId,
};
use crate::host_control::{HostControl, PluginType, ProcessorInfo, TrackInfo};
use crate::processor::{Processor, RtEventSink};
use crate::receiver::AsyncEventReceiver;
use crate::track::Track;
use crate::transport::Transport;

/// Engine-side audio channel count on each of input and output
pub const MAX_ENGINE_CHANNELS: usize = 8;

/// Upper bound on simultaneously existing tracks
pub const MAX_TRACKS: usize = 32;

/// Capacity of the shared sink tracks publish RT events into
pub const ENGINE_EVENT_SINK_CAPACITY: usize = 256;

const MAX_CONNECTIONS: usize = 64;
const RT_EVENT_BATCH_CAPACITY: usize = 256;
const GRAPH_COMMAND_QUEUE_CAPACITY: usize = 128;
const RETIRED_QUEUE_CAPACITY: usize = 256;
const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);
const NON_RT_ACK_TIMEOUT: Duration = Duration::from_millis(10);

/// Factory for an internal plugin, registered under its uid
pub type PluginFactory = Box<dyn Fn() -> Box<dyn Processor> + Send>;

/// One engine channel patched to one track channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConnection {
    pub engine_channel: usize,
    pub track_channel: usize,
    pub track: ObjectId,
}

/// Graph mutation shipped from the control half to the audio half
enum GraphCommand {
    AddTrack {
        event_id: EventId,
        track: Box<Track>,
    },
    DeleteTrack {
        event_id: EventId,
        track_id: ObjectId,
    },
    AddProcessor {
        event_id: EventId,
        track_id: ObjectId,
        processor: Box<dyn Processor>,
    },
    RemoveProcessor {
        event_id: EventId,
        track_id: ObjectId,
        processor_id: ObjectId,
    },
    ConnectInput {
        event_id: EventId,
        connection: AudioConnection,
    },
    ConnectOutput {
        event_id: EventId,
        connection: AudioConnection,
    },
    Resume {
        event_id: EventId,
    },
}

/// Objects evicted from the live graph, shipped back for control-side drop
enum RetiredObject {
    Track(Box<Track>),
    Processor(Box<dyn Processor>),
    Str(Box<String>),
}

// ═══════════════════════════════════════════════════════════════════════════
// RT HALF
// ═══════════════════════════════════════════════════════════════════════════

/// The audio half of the engine; owned by the audio callback
pub struct RtEngine {
    tracks: Vec<Box<Track>>,
    transport: Transport,
    to_rt: Arc<RtEventFifo>,
    rt_reply: Arc<RtEventFifo>,
    rt_out: Arc<RtEventFifo>,
    /// Shared sink every track publishes into; drained to `rt_out` once per
    /// chunk so drops can be counted
    staging: Arc<RtEventFifo<ENGINE_EVENT_SINK_CAPACITY>>,
    commands: Consumer<GraphCommand>,
    retired: Producer<RetiredObject>,
    input_buffer: ChunkSampleBuffer,
    output_buffer: ChunkSampleBuffer,
    input_connections: Vec<AudioConnection>,
    output_connections: Vec<AudioConnection>,
    event_batch: Vec<RtEvent>,
    paused: bool,
    dropped_rt_events: Arc<AtomicU64>,
}

impl RtEngine {
    /// Apply pending graph commands without processing audio. Used by the
    /// control half before real-time processing has started.
    pub fn process_pending_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply_command(command);
        }
    }

    /// The audio callback. `inputs` and `outputs` carry one slice of
    /// exactly [`AUDIO_CHUNK_SIZE`] frames per channel; drivers with other
    /// block sizes must rechunk.
    pub fn process_chunk(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        // 1. Graph changes land at chunk boundaries
        self.process_pending_commands();

        // 2. Host input into the engine input buffer
        self.input_buffer.clear();
        let input_channels = inputs.len().min(MAX_ENGINE_CHANNELS);
        for ch in 0..input_channels {
            debug_assert_eq!(inputs[ch].len(), AUDIO_CHUNK_SIZE);
            self.input_buffer.channel_mut(ch).copy_from_slice(inputs[ch]);
        }

        // 3. Incoming control events, sorted by offset within the chunk
        self.drain_incoming_events();
        for index in 0..self.event_batch.len() {
            let event = self.event_batch[index];
            self.dispatch_rt_event(event);
        }
        self.event_batch.clear();

        // 4. Render every track and mix into the engine output
        self.output_buffer.clear();
        if !self.paused {
            for i in 0..self.tracks.len() {
                let track_id = self.tracks[i].id();
                self.tracks[i].input_buffer_mut().clear();
                for connection in &self.input_connections {
                    if connection.track == track_id {
                        let source = self.input_buffer.channel(connection.engine_channel);
                        self.tracks[i]
                            .input_buffer_mut()
                            .channel_mut(connection.track_channel)
                            .copy_from_slice(source);
                    }
                }

                self.tracks[i].render();

                for connection in &self.output_connections {
                    if connection.track == track_id {
                        let source = self.tracks[i].output_buffer().channel(connection.track_channel);
                        let destination = self.output_buffer.channel_mut(connection.engine_channel);
                        for (out, sample) in destination.iter_mut().zip(source.iter()) {
                            *out += *sample;
                        }
                    }
                }
            }
        }

        // 5. Relay events the graph emitted this chunk
        while let Some(event) = self.staging.pop() {
            if !self.rt_out.push(event) {
                self.dropped_rt_events.fetch_add(1, Ordering::Relaxed);
            }
        }

        // 6. Engine output to the host
        let output_channels = outputs.len().min(MAX_ENGINE_CHANNELS);
        for ch in 0..output_channels {
            debug_assert_eq!(outputs[ch].len(), AUDIO_CHUNK_SIZE);
            outputs[ch].copy_from_slice(self.output_buffer.channel(ch));
        }
        for channel in outputs.iter_mut().skip(MAX_ENGINE_CHANNELS) {
            channel.fill(0.0);
        }

        self.transport.advance_chunk();
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.transport.set_sample_rate(sample_rate);
        for track in &mut self.tracks {
            track.configure(sample_rate);
        }
    }

    /// Pull events from the to-RT FIFO into the batch buffer and order them
    /// by sample offset (stable, in place, alloc-free)
    fn drain_incoming_events(&mut self) {
        while self.event_batch.len() < RT_EVENT_BATCH_CAPACITY {
            match self.to_rt.pop() {
                Some(event) => self.event_batch.push(event),
                None => break,
            }
        }

        let batch = &mut self.event_batch[..];
        for i in 1..batch.len() {
            let mut j = i;
            while j > 0 && batch[j - 1].sample_offset() > batch[j].sample_offset() {
                batch.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    fn dispatch_rt_event(&mut self, event: RtEvent) {
        if self.transport.process_event(&event) {
            return;
        }

        match event {
            RtEvent::StopEngine(e) => {
                self.paused = true;
                self.send_reply(e.event_id, AsyncWorkStatus::Completed);
            }
            RtEvent::StringPropertyChange(e) => {
                self.deliver_to_processor(event, e.processor_id);
                // Reclaim the string on a control thread. The receiver had
                // its one chance to copy the contents during delivery.
                // SAFETY: ownership of the pointer travelled with the event
                // and nobody else will free it
                let retired = RetiredObject::Str(unsafe { Box::from_raw(e.value as *mut String) });
                if let Err(rtrb::PushError::Full(object)) = self.retired.push(retired) {
                    // Leaking beats freeing on the audio thread
                    std::mem::forget(object);
                    self.dropped_rt_events.fetch_add(1, Ordering::Relaxed);
                }
            }
            _ => {
                let target = event.processor_id();
                self.deliver_to_processor(event, target);
            }
        }
    }

    fn deliver_to_processor(&mut self, event: RtEvent, target: ObjectId) {
        for track in &mut self.tracks {
            if track.id() == target {
                track.process_event(event);
                return;
            }
            if let Some(processor) = track.processor_mut(target) {
                processor.process_event(event);
                return;
            }
        }
        // Unknown target: the event is malformed or raced a removal
        self.dropped_rt_events.fetch_add(1, Ordering::Relaxed);
    }

    fn apply_command(&mut self, command: GraphCommand) {
        match command {
            GraphCommand::AddTrack { event_id, mut track } => {
                if self.tracks.len() < MAX_TRACKS {
                    track.set_event_output(Some(self.staging.clone() as RtEventSink));
                    track.data_mut().set_active(true);
                    self.tracks.push(track);
                    self.send_reply(event_id, AsyncWorkStatus::Completed);
                } else {
                    self.retire(RetiredObject::Track(track));
                    self.send_reply(event_id, AsyncWorkStatus::Failed);
                }
            }
            GraphCommand::DeleteTrack { event_id, track_id } => {
                match self.tracks.iter().position(|t| t.id() == track_id) {
                    Some(index) => {
                        let track = self.tracks.remove(index);
                        self.input_connections.retain(|c| c.track != track_id);
                        self.output_connections.retain(|c| c.track != track_id);
                        self.retire(RetiredObject::Track(track));
                        self.send_reply(event_id, AsyncWorkStatus::Completed);
                    }
                    None => self.send_reply(event_id, AsyncWorkStatus::Failed),
                }
            }
            GraphCommand::AddProcessor {
                event_id,
                track_id,
                processor,
            } => {
                let rejected = match self.tracks.iter_mut().find(|t| t.id() == track_id) {
                    Some(track) => track.add(processor).err(),
                    None => Some(processor),
                };
                let status = match rejected {
                    None => AsyncWorkStatus::Completed,
                    Some(processor) => {
                        self.retire(RetiredObject::Processor(processor));
                        AsyncWorkStatus::Failed
                    }
                };
                self.send_reply(event_id, status);
            }
            GraphCommand::RemoveProcessor {
                event_id,
                track_id,
                processor_id,
            } => {
                let removed = self
                    .tracks
                    .iter_mut()
                    .find(|t| t.id() == track_id)
                    .and_then(|track| track.remove(processor_id));
                match removed {
                    Some(processor) => {
                        self.retire(RetiredObject::Processor(processor));
                        self.send_reply(event_id, AsyncWorkStatus::Completed);
                    }
                    None => self.send_reply(event_id, AsyncWorkStatus::Failed),
                }
            }
            GraphCommand::ConnectInput {
                event_id,
                connection,
            } => {
                let status = if self.input_connections.len() < MAX_CONNECTIONS {
                    self.input_connections.push(connection);
                    AsyncWorkStatus::Completed
                } else {
                    AsyncWorkStatus::Failed
                };
                self.send_reply(event_id, status);
            }
            GraphCommand::ConnectOutput {
                event_id,
                connection,
            } => {
                let status = if self.output_connections.len() < MAX_CONNECTIONS {
                    self.output_connections.push(connection);
                    AsyncWorkStatus::Completed
                } else {
                    AsyncWorkStatus::Failed
                };
                self.send_reply(event_id, status);
            }
            GraphCommand::Resume { event_id } => {
                self.paused = false;
                self.send_reply(event_id, AsyncWorkStatus::Completed);
            }
        }
    }

    fn retire(&mut self, object: RetiredObject) {
        if let Err(rtrb::PushError::Full(object)) = self.retired.push(object) {
            std::mem::forget(object);
            self.dropped_rt_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn send_reply(&mut self, event_id: EventId, status: AsyncWorkStatus) {
        let reply = RtEvent::async_work_completion(ObjectId::NONE, event_id, status);
        if !self.rt_reply.push(reply) {
            self.dropped_rt_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONTROL HALF
// ═══════════════════════════════════════════════════════════════════════════

/// Control-side view of one registered processor
struct ProcessorRecord {
    id: ObjectId,
    name: String,
    label: String,
    is_track: bool,
    owner_track: Option<ObjectId>,
    input_channels: usize,
    output_channels: usize,
    input_busses: usize,
    output_busses: usize,
    parameters: Vec<ParameterDescriptor>,
    parameter_values: HashMap<ObjectId, Arc<ParameterValue>>,
}

impl ProcessorRecord {
    fn from_processor(
        processor: &dyn Processor,
        is_track: bool,
        owner_track: Option<ObjectId>,
        input_busses: usize,
        output_busses: usize,
    ) -> Self {
        let data = processor.data();
        let parameters = data.parameters().descriptors().to_vec();
        let parameter_values = parameters
            .iter()
            .filter_map(|d| data.parameters().value(d.id).map(|v| (d.id, v)))
            .collect();

        Self {
            id: data.id(),
            name: data.name().to_string(),
            label: data.label().to_string(),
            is_track,
            owner_track,
            input_channels: data.input_channels(),
            output_channels: data.output_channels(),
            input_busses,
            output_busses,
            parameters,
            parameter_values,
        }
    }

    fn parameter_by_name(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|d| d.name == name)
    }
}

#[derive(Default)]
struct ProcessorRegistry {
    by_name: HashMap<String, ObjectId>,
    records: HashMap<ObjectId, ProcessorRecord>,
    track_order: Vec<ObjectId>,
    chains: HashMap<ObjectId, Vec<ObjectId>>,
}

impl ProcessorRegistry {
    fn insert(&mut self, record: ProcessorRecord, duplicate_error: EngineError) -> EngineResult<()> {
        if record.name.is_empty() || self.by_name.contains_key(&record.name) {
            return Err(duplicate_error);
        }
        self.by_name.insert(record.name.clone(), record.id);
        if record.is_track {
            self.track_order.push(record.id);
            self.chains.insert(record.id, Vec::new());
        }
        self.records.insert(record.id, record);
        Ok(())
    }

    fn record_from_name(&self, name: &str) -> Option<&ProcessorRecord> {
        self.by_name.get(name).and_then(|id| self.records.get(id))
    }

    fn track_from_name(&self, name: &str) -> EngineResult<&ProcessorRecord> {
        match self.record_from_name(name) {
            Some(record) if record.is_track => Ok(record),
            _ => Err(EngineError::InvalidTrackName),
        }
    }

    fn remove(&mut self, id: ObjectId) {
        if let Some(record) = self.records.remove(&id) {
            self.by_name.remove(&record.name);
            if record.is_track {
                self.track_order.retain(|&t| t != id);
                if let Some(chain) = self.chains.remove(&id) {
                    for processor_id in chain {
                        if let Some(plugin) = self.records.remove(&processor_id) {
                            self.by_name.remove(&plugin.name);
                        }
                    }
                }
            } else if let Some(owner) = record.owner_track {
                if let Some(chain) = self.chains.get_mut(&owner) {
                    chain.retain(|&p| p != id);
                }
            }
        }
    }
}

/// The control half of the engine; implements [`HostControl`]
pub struct AudioEngine {
    sample_rate: f32,
    registry: ProcessorRegistry,
    plugin_factories: HashMap<String, PluginFactory>,
    commands: Producer<GraphCommand>,
    retired: Consumer<RetiredObject>,
    receiver: AsyncEventReceiver,
    dispatcher: EventDispatcher,
    tempo: f32,
    time_signature: TimeSignature,
    playing_mode: PlayingMode,
    sync_mode: SyncMode,
    rt: Option<RtEngine>,
    realtime: bool,
    dropped_rt_events: Arc<AtomicU64>,
}

impl AudioEngine {
    pub fn new(sample_rate: f32) -> Self {
        let to_rt: Arc<RtEventFifo> = Arc::new(RtEventFifo::new());
        let rt_reply: Arc<RtEventFifo> = Arc::new(RtEventFifo::new());
        let rt_out: Arc<RtEventFifo> = Arc::new(RtEventFifo::new());
        let staging = Arc::new(RtEventFifo::new());
        let dropped_rt_events = Arc::new(AtomicU64::new(0));

        let (command_tx, command_rx) = RingBuffer::new(GRAPH_COMMAND_QUEUE_CAPACITY);
        let (retired_tx, retired_rx) = RingBuffer::new(RETIRED_QUEUE_CAPACITY);

        let rt = RtEngine {
            tracks: Vec::with_capacity(MAX_TRACKS),
            transport: Transport::new(sample_rate),
            to_rt: to_rt.clone(),
            rt_reply: rt_reply.clone(),
            rt_out: rt_out.clone(),
            staging,
            commands: command_rx,
            retired: retired_tx,
            input_buffer: ChunkSampleBuffer::new(MAX_ENGINE_CHANNELS),
            output_buffer: ChunkSampleBuffer::new(MAX_ENGINE_CHANNELS),
            input_connections: Vec::with_capacity(MAX_CONNECTIONS),
            output_connections: Vec::with_capacity(MAX_CONNECTIONS),
            event_batch: Vec::with_capacity(RT_EVENT_BATCH_CAPACITY),
            paused: false,
            dropped_rt_events: dropped_rt_events.clone(),
        };

        Self {
            sample_rate,
            registry: ProcessorRegistry::default(),
            plugin_factories: HashMap::new(),
            commands: command_tx,
            retired: retired_rx,
            receiver: AsyncEventReceiver::new(rt_reply),
            dispatcher: EventDispatcher::new(to_rt, rt_out),
            tempo: crate::transport::DEFAULT_TEMPO,
            time_signature: TimeSignature::default(),
            playing_mode: PlayingMode::default(),
            sync_mode: SyncMode::default(),
            rt: Some(rt),
            realtime: false,
            dropped_rt_events,
        }
    }

    /// Start the control-side machinery (dispatcher thread, worker pool)
    pub fn start(&mut self) {
        self.dispatcher.start();
    }

    pub fn stop(&mut self) {
        self.dispatcher.stop();
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Register an internal plugin factory under `uid`
    pub fn register_plugin_factory(&mut self, uid: &str, factory: PluginFactory) {
        self.plugin_factories.insert(uid.to_string(), factory);
    }

    /// Hand the audio half to the audio driver. Host-control operations
    /// performed afterwards are applied at chunk boundaries and awaited.
    pub fn take_rt_engine(&mut self) -> Option<RtEngine> {
        let rt = self.rt.take()?;
        self.realtime = true;
        Some(rt)
    }

    /// Give the audio half back after the driver has stopped
    pub fn return_rt_engine(&mut self, rt: RtEngine) {
        self.rt = Some(rt);
        self.realtime = false;
    }

    /// Events dropped on the audio thread since startup (full FIFOs,
    /// unroutable targets)
    pub fn rt_event_drop_count(&self) -> u64 {
        self.dropped_rt_events.load(Ordering::Relaxed)
    }

    /// Pause graph processing; the callback keeps draining events and
    /// outputs silence until resumed
    pub fn pause_processing(&mut self) -> EngineResult<()> {
        let event = Event::new(PosterId::AudioEngine, EventBody::StopEngine);
        let id = event.id();
        self.dispatcher.post_event(event);
        if self.realtime {
            if self.receiver.wait_for_response(id, COMMAND_TIMEOUT) {
                Ok(())
            } else {
                Err(EngineError::Timeout)
            }
        } else {
            // Applied whenever the RT half next runs
            Ok(())
        }
    }

    pub fn resume_processing(&mut self) -> EngineResult<()> {
        let event_id = next_event_id();
        self.execute_command(GraphCommand::Resume { event_id }, event_id)
    }

    /// Drop objects the audio thread has retired
    pub fn collect_garbage(&mut self) {
        while self.retired.pop().is_ok() {}
    }

    fn execute_command(&mut self, command: GraphCommand, event_id: EventId) -> EngineResult<()> {
        if self.commands.push(command).is_err() {
            return Err(EngineError::QueueFull);
        }

        if let Some(rt) = self.rt.as_mut() {
            rt.process_pending_commands();
        }

        let timeout = if self.realtime {
            COMMAND_TIMEOUT
        } else {
            NON_RT_ACK_TIMEOUT
        };
        if self.receiver.wait_for_response(event_id, timeout) {
            self.collect_garbage();
            Ok(())
        } else if self.realtime {
            Err(EngineError::Timeout)
        } else {
            self.collect_garbage();
            Err(EngineError::Other)
        }
    }

    fn post_to_engine(&self, body: EventBody) {
        self.dispatcher.post_event(Event::new(PosterId::AudioEngine, body));
    }

    fn create_track_common(&mut self, name: &str, track: Track) -> EngineResult<ObjectId> {
        if self.registry.track_order.len() >= MAX_TRACKS {
            return Err(EngineError::Other);
        }
        let mut track = track;
        track.data_mut().set_name(name);
        track.data_mut().set_label(name);
        track.configure(self.sample_rate);

        let record = ProcessorRecord::from_processor(
            &track,
            true,
            None,
            track.input_busses(),
            track.output_busses(),
        );
        if record.name.is_empty() || self.registry.by_name.contains_key(&record.name) {
            return Err(EngineError::InvalidTrackName);
        }

        let id = track.id();
        let event_id = next_event_id();
        self.execute_command(
            GraphCommand::AddTrack {
                event_id,
                track: Box::new(track),
            },
            event_id,
        )?;
        self.registry.insert(record, EngineError::InvalidTrackName)?;
        log::info!("Created track \"{}\" with id {:?}", name, id);
        Ok(id)
    }
}

impl HostControl for AudioEngine {
    fn create_track(&mut self, name: &str, channels: usize) -> EngineResult<ObjectId> {
        let track = Track::new(channels)?;
        self.create_track_common(name, track)
    }

    fn create_multibus_track(
        &mut self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> EngineResult<ObjectId> {
        let track = Track::new_multibus(input_busses, output_busses)?;
        self.create_track_common(name, track)
    }

    fn delete_track(&mut self, name: &str) -> EngineResult<()> {
        let track_id = self.registry.track_from_name(name)?.id;
        let event_id = next_event_id();
        self.execute_command(GraphCommand::DeleteTrack { event_id, track_id }, event_id)?;
        self.registry.remove(track_id);
        log::info!("Deleted track \"{}\"", name);
        Ok(())
    }

    fn add_plugin_to_track(
        &mut self,
        track_name: &str,
        uid: &str,
        name: &str,
        path: &str,
        plugin_type: PluginType,
    ) -> EngineResult<ObjectId> {
        let track_id = self.registry.track_from_name(track_name)?.id;
        if name.is_empty() || self.registry.by_name.contains_key(name) {
            return Err(EngineError::InvalidPluginName);
        }

        let mut plugin = match plugin_type {
            PluginType::Internal => match self.plugin_factories.get(uid) {
                Some(factory) => factory(),
                None => return Err(EngineError::InvalidPluginUid),
            },
            PluginType::Vst2x | PluginType::Vst3x => {
                log::warn!(
                    "External plugin format requested for \"{}\" ({}), not built in",
                    uid,
                    path
                );
                return Err(EngineError::Other);
            }
        };

        plugin.data_mut().set_name(name);
        plugin.data_mut().set_label(uid);
        if let Err(e) = plugin.init(self.sample_rate) {
            log::error!("Plugin \"{}\" failed to initialise: {}", name, e);
            return Err(e);
        }

        let record = ProcessorRecord::from_processor(plugin.as_ref(), false, Some(track_id), 0, 0);
        let plugin_id = record.id;

        let event_id = next_event_id();
        self.execute_command(
            GraphCommand::AddProcessor {
                event_id,
                track_id,
                processor: plugin,
            },
            event_id,
        )?;

        self.registry.insert(record, EngineError::InvalidPluginName)?;
        if let Some(chain) = self.registry.chains.get_mut(&track_id) {
            chain.push(plugin_id);
        }
        log::info!("Added plugin \"{}\" ({}) to track \"{}\"", name, uid, track_name);
        Ok(plugin_id)
    }

    fn remove_plugin_from_track(
        &mut self,
        track_name: &str,
        plugin_name: &str,
    ) -> EngineResult<()> {
        let track_id = self.registry.track_from_name(track_name)?.id;
        let plugin_id = match self.registry.record_from_name(plugin_name) {
            Some(record) if record.owner_track == Some(track_id) => record.id,
            _ => return Err(EngineError::InvalidProcessor),
        };

        let event_id = next_event_id();
        self.execute_command(
            GraphCommand::RemoveProcessor {
                event_id,
                track_id,
                processor_id: plugin_id,
            },
            event_id,
        )?;
        self.registry.remove(plugin_id);
        log::info!("Removed plugin \"{}\" from track \"{}\"", plugin_name, track_name);
        Ok(())
    }

    fn connect_audio_input_channel(
        &mut self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let record = self.registry.track_from_name(track_name)?;
        if engine_channel >= MAX_ENGINE_CHANNELS || track_channel >= record.input_channels {
            return Err(EngineError::InvalidChannel);
        }
        let connection = AudioConnection {
            engine_channel,
            track_channel,
            track: record.id,
        };
        let event_id = next_event_id();
        self.execute_command(
            GraphCommand::ConnectInput {
                event_id,
                connection,
            },
            event_id,
        )
    }

    fn connect_audio_output_channel(
        &mut self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let record = self.registry.track_from_name(track_name)?;
        if engine_channel >= MAX_ENGINE_CHANNELS || track_channel >= record.output_channels {
            return Err(EngineError::InvalidChannel);
        }
        let connection = AudioConnection {
            engine_channel,
            track_channel,
            track: record.id,
        };
        let event_id = next_event_id();
        self.execute_command(
            GraphCommand::ConnectOutput {
                event_id,
                connection,
            },
            event_id,
        )
    }

    fn connect_audio_input_bus(
        &mut self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let input_busses = self.registry.track_from_name(track_name)?.input_busses;
        if track_bus >= input_busses || (engine_bus + 1) * 2 > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidBus);
        }
        for ch in 0..2 {
            self.connect_audio_input_channel(engine_bus * 2 + ch, track_bus * 2 + ch, track_name)?;
        }
        Ok(())
    }

    fn connect_audio_output_bus(
        &mut self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let output_busses = self.registry.track_from_name(track_name)?.output_busses;
        if track_bus >= output_busses || (engine_bus + 1) * 2 > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidBus);
        }
        for ch in 0..2 {
            self.connect_audio_output_channel(engine_bus * 2 + ch, track_bus * 2 + ch, track_name)?;
        }
        Ok(())
    }

    fn set_sample_rate(&mut self, sample_rate: f32) -> EngineResult<()> {
        if self.realtime {
            log::warn!("Refusing sample rate change while processing is live");
            return Err(EngineError::Other);
        }
        self.sample_rate = sample_rate;
        if let Some(rt) = self.rt.as_mut() {
            rt.set_sample_rate(sample_rate);
        }
        Ok(())
    }

    fn set_tempo(&mut self, tempo: f32) -> EngineResult<()> {
        self.tempo = tempo;
        self.post_to_engine(EventBody::SetTempo(tempo));
        Ok(())
    }

    fn set_time_signature(&mut self, signature: TimeSignature) -> EngineResult<()> {
        self.time_signature = signature;
        self.post_to_engine(EventBody::SetTimeSignature(signature));
        Ok(())
    }

    fn set_transport_mode(&mut self, mode: PlayingMode) -> EngineResult<()> {
        self.playing_mode = mode;
        self.post_to_engine(EventBody::SetPlayingMode(mode));
        Ok(())
    }

    fn set_tempo_sync_mode(&mut self, mode: SyncMode) -> EngineResult<()> {
        self.sync_mode = mode;
        self.post_to_engine(EventBody::SetSyncMode(mode));
        Ok(())
    }

    fn set_parameter_value(
        &mut self,
        processor_name: &str,
        parameter_name: &str,
        value: f32,
    ) -> EngineResult<()> {
        let record = self
            .registry
            .record_from_name(processor_name)
            .ok_or(EngineError::InvalidProcessor)?;
        let descriptor = record
            .parameter_by_name(parameter_name)
            .ok_or(EngineError::InvalidParameter)?;

        // Publish to the audio thread immediately; the RT event below only
        // notifies the processor itself
        if let Some(live_value) = record.parameter_values.get(&descriptor.id) {
            live_value.store(value, descriptor.pre_processor.process(value));
        }

        let body = EventBody::ParameterChange(ParameterChangeEvent {
            processor_id: record.id,
            parameter_id: descriptor.id,
            value,
        });
        self.post_to_engine(body);
        Ok(())
    }

    fn parameter_value(&self, processor_name: &str, parameter_name: &str) -> EngineResult<f32> {
        let record = self
            .registry
            .record_from_name(processor_name)
            .ok_or(EngineError::InvalidProcessor)?;
        let descriptor = record
            .parameter_by_name(parameter_name)
            .ok_or(EngineError::InvalidParameter)?;
        match record.parameter_values.get(&descriptor.id) {
            Some(value) => Ok(value.raw_value()),
            None => Err(EngineError::InvalidParameter),
        }
    }

    fn parameter_list(&self, processor_name: &str) -> EngineResult<Vec<ParameterDescriptor>> {
        let record = self
            .registry
            .record_from_name(processor_name)
            .ok_or(EngineError::InvalidProcessor)?;
        Ok(record.parameters.clone())
    }

    fn send_note_on(&mut self, track_name: &str, note: u8, velocity: f32) -> EngineResult<()> {
        let track_id = self.registry.track_from_name(track_name)?.id;
        self.post_to_engine(EventBody::Keyboard(KeyboardEvent {
            kind: KeyboardEventKind::NoteOn,
            track_id,
            note,
            velocity,
        }));
        Ok(())
    }

    fn send_note_off(&mut self, track_name: &str, note: u8, velocity: f32) -> EngineResult<()> {
        let track_id = self.registry.track_from_name(track_name)?.id;
        self.post_to_engine(EventBody::Keyboard(KeyboardEvent {
            kind: KeyboardEventKind::NoteOff,
            track_id,
            note,
            velocity,
        }));
        Ok(())
    }

    fn processor_id_from_name(&self, name: &str) -> EngineResult<ObjectId> {
        self.registry
            .by_name
            .get(name)
            .copied()
            .ok_or(EngineError::InvalidProcessor)
    }

    fn processor_list(&self) -> Vec<ProcessorInfo> {
        self.registry
            .records
            .values()
            .map(|record| ProcessorInfo {
                id: record.id,
                name: record.name.clone(),
                label: record.label.clone(),
                track: record.owner_track,
            })
            .collect()
    }

    fn track_list(&self) -> Vec<TrackInfo> {
        self.registry
            .track_order
            .iter()
            .filter_map(|id| self.registry.records.get(id))
            .map(|record| TrackInfo {
                id: record.id,
                name: record.name.clone(),
                input_channels: record.input_channels,
                output_channels: record.output_channels,
                input_busses: record.input_busses,
                output_busses: record.output_busses,
                processors: self
                    .registry
                    .chains
                    .get(&record.id)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
        self.collect_garbage();
    }
}
