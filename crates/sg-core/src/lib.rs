//! sg-core: Shared types, traits, and utilities for Soundgraph
//!
//! This crate provides the foundational types used across all soundgraph
//! crates: the fixed-size audio chunk buffer, the real-time event record and
//! its lock-free FIFO, the parameter model, and the id/error types.

mod buffer;
mod error;
mod fifo;
mod id;
mod parameter;
mod rt_event;
mod time;

pub use buffer::*;
pub use error::*;
pub use fifo::*;
pub use id::*;
pub use parameter::*;
pub use rt_event::*;
pub use time::*;

/// Type alias for audio samples (32-bit float throughout the graph)
pub type Sample = f32;

/// Number of frames processed per audio callback invocation.
///
/// Every `ChunkSampleBuffer` holds exactly this many frames per channel and
/// every `sample_offset` in an [`RtEvent`] lies in `[0, AUDIO_CHUNK_SIZE)`.
pub const AUDIO_CHUNK_SIZE: usize = 64;
