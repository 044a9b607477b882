//! sg-engine: the Soundgraph audio engine
//!
//! The real-time processing graph and everything needed to drive it:
//! - The processor contract and common processor state
//! - Tracks: ordered chains with per-bus gain/pan and keyboard forwarding
//! - The engine split into a control half and an audio-callback half
//! - The control-side event dispatcher with posters and a worker pool
//! - The synchronous request/response receiver over the RT reply FIFO
//! - The narrow host-control surface consumed by frontends

mod dispatcher;
mod engine;
mod event;
mod host_control;
mod processor;
mod receiver;
mod track;
mod transport;

pub use dispatcher::{EventDispatcher, DISPATCH_QUEUE_CAPACITY};
pub use engine::{
    AudioConnection, AudioEngine, PluginFactory, RtEngine, ENGINE_EVENT_SINK_CAPACITY,
    MAX_ENGINE_CHANNELS, MAX_TRACKS,
};
pub use event::{
    Event, EventBody, EventCompletionCallback, EventPoster, EventStatus, KeyboardEvent,
    KeyboardEventKind, ParameterChangeEvent, PosterId,
};
pub use host_control::{HostControl, PluginType, ProcessorInfo, TrackInfo};
pub use processor::{bypass_process, Processor, ProcessorData, RtEventSink};
pub use receiver::AsyncEventReceiver;
pub use track::{
    apply_pan_and_gain, Track, LEFT_CHANNEL_INDEX, PAN_GAIN_3_DB, PROCESSOR_EVENT_SINK_CAPACITY,
    RIGHT_CHANNEL_INDEX, TRACK_MAX_BUSSES, TRACK_MAX_PROCESSORS,
};
pub use transport::{Transport, DEFAULT_TEMPO};
