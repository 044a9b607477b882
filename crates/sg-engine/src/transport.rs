//! Transport state owned by the audio half of the engine
//!
//! Updated exclusively through RT events so changes land at chunk
//! boundaries; control-side code keeps its own cached copies for getters.

use sg_core::{PlayingMode, RtEvent, SyncMode, TimeSignature, AUDIO_CHUNK_SIZE};

pub const DEFAULT_TEMPO: f32 = 120.0;

#[derive(Debug)]
pub struct Transport {
    sample_rate: f32,
    tempo: f32,
    time_signature: TimeSignature,
    playing_mode: PlayingMode,
    sync_mode: SyncMode,
    /// Frames elapsed while playing
    position_samples: u64,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            tempo: DEFAULT_TEMPO,
            time_signature: TimeSignature::default(),
            playing_mode: PlayingMode::default(),
            sync_mode: SyncMode::default(),
            position_samples: 0,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    #[inline]
    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    #[inline]
    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    #[inline]
    pub fn playing_mode(&self) -> PlayingMode {
        self.playing_mode
    }

    #[inline]
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    #[inline]
    pub fn position_samples(&self) -> u64 {
        self.position_samples
    }

    /// Current position in beats under the current tempo
    pub fn position_beats(&self) -> f64 {
        self.position_samples as f64 / self.sample_rate as f64 * self.tempo as f64 / 60.0
    }

    /// Consume a transport-family event. Returns `false` for events the
    /// transport does not handle.
    pub fn process_event(&mut self, event: &RtEvent) -> bool {
        match event {
            RtEvent::TempoChange(e) => {
                self.tempo = e.tempo;
                true
            }
            RtEvent::TimeSignatureChange(e) => {
                self.time_signature = e.time_signature;
                true
            }
            RtEvent::PlayingModeChange(e) => {
                if self.playing_mode == PlayingMode::Stopped && e.mode == PlayingMode::Playing {
                    self.position_samples = 0;
                }
                self.playing_mode = e.mode;
                true
            }
            RtEvent::SyncModeChange(e) => {
                self.sync_mode = e.mode;
                true
            }
            _ => false,
        }
    }

    /// Advance the position by one audio chunk
    pub fn advance_chunk(&mut self) {
        if self.playing_mode == PlayingMode::Playing {
            self.position_samples += AUDIO_CHUNK_SIZE as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_event_handling() {
        let mut transport = Transport::new(48_000.0);
        assert_eq!(transport.tempo(), DEFAULT_TEMPO);

        assert!(transport.process_event(&RtEvent::tempo_change(0, 135.0)));
        assert_eq!(transport.tempo(), 135.0);

        let signature = TimeSignature {
            numerator: 6,
            denominator: 8,
        };
        assert!(transport.process_event(&RtEvent::time_signature_change(0, signature)));
        assert_eq!(transport.time_signature(), signature);

        assert!(!transport.process_event(&RtEvent::note_on(sg_core::ObjectId(1), 0, 60, 1.0)));
    }

    #[test]
    fn test_position_advances_only_while_playing() {
        let mut transport = Transport::new(48_000.0);
        transport.advance_chunk();
        assert_eq!(transport.position_samples(), 0);

        transport.process_event(&RtEvent::playing_mode_change(0, PlayingMode::Playing));
        transport.advance_chunk();
        transport.advance_chunk();
        assert_eq!(transport.position_samples(), 2 * AUDIO_CHUNK_SIZE as u64);

        // Stop keeps the position, restarting rewinds it
        transport.process_event(&RtEvent::playing_mode_change(0, PlayingMode::Stopped));
        assert_eq!(transport.position_samples(), 2 * AUDIO_CHUNK_SIZE as u64);
        transport.process_event(&RtEvent::playing_mode_change(0, PlayingMode::Playing));
        assert_eq!(transport.position_samples(), 0);
    }
}
