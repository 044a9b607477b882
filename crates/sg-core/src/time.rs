//! Musical time and transport value types

use serde::{Deserialize, Serialize};

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Transport playing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayingMode {
    Stopped,
    Playing,
}

impl Default for PlayingMode {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Tempo source selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Free-running internal clock
    Internal,
    /// Follow external MIDI clock
    MidiSlave,
    /// Follow an Ableton Link session
    AbletonLink,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::Internal
    }
}
