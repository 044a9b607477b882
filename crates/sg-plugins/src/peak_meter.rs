//! Peak meter plugin
//!
//! Audio passes through unchanged; per-channel peak levels are smoothed and
//! published upstream a few times per second as parameter-change events.
//! The canonical example of a processor that emits RT events.

use std::sync::Arc;

use sg_core::{
    ChunkSampleBuffer, EngineResult, ObjectId, ParameterPreProcessor, ParameterValue, RtEvent,
    AUDIO_CHUNK_SIZE,
};
use sg_engine::{bypass_process, Processor, ProcessorData};

pub const PEAK_METER_PLUGIN_UID: &str = "sg.peak_meter";

const MAX_METERED_CHANNELS: usize = 2;

/// How often the measured levels are published
const REFRESH_RATE_HZ: f32 = 25.0;

/// Decay time constant of the level smoothing
const SMOOTHING_TIME_S: f32 = 0.025;

const SILENCE_DB: f32 = -120.0;

fn to_db(gain: f32) -> f32 {
    if gain < 1e-6 {
        SILENCE_DB
    } else {
        20.0 * gain.log10()
    }
}

pub struct PeakMeterPlugin {
    data: ProcessorData,
    level_parameters: [Arc<ParameterValue>; MAX_METERED_CHANNELS],
    level_parameter_ids: [ObjectId; MAX_METERED_CHANNELS],
    refresh_interval: usize,
    sample_count: usize,
    smoothing_coef: f32,
    smoothed: [f32; MAX_METERED_CHANNELS],
}

impl PeakMeterPlugin {
    pub fn new() -> Self {
        let mut data = ProcessorData::new(MAX_METERED_CHANNELS, MAX_METERED_CHANNELS);

        let left = data
            .register_float_parameter(
                "left_level",
                "Left",
                SILENCE_DB,
                SILENCE_DB,
                24.0,
                ParameterPreProcessor::Clamp {
                    min: SILENCE_DB,
                    max: 24.0,
                },
            )
            .expect("parameter registration on a fresh processor");
        let right = data
            .register_float_parameter(
                "right_level",
                "Right",
                SILENCE_DB,
                SILENCE_DB,
                24.0,
                ParameterPreProcessor::Clamp {
                    min: SILENCE_DB,
                    max: 24.0,
                },
            )
            .expect("parameter registration on a fresh processor");

        let left_id = data
            .parameters()
            .descriptor_from_name("left_level")
            .map(|d| d.id)
            .expect("descriptor just registered");
        let right_id = data
            .parameters()
            .descriptor_from_name("right_level")
            .map(|d| d.id)
            .expect("descriptor just registered");

        Self {
            data,
            level_parameters: [left, right],
            level_parameter_ids: [left_id, right_id],
            refresh_interval: 1,
            sample_count: 0,
            smoothing_coef: 0.0,
            smoothed: [0.0; MAX_METERED_CHANNELS],
        }
    }

    fn update_refresh_interval(&mut self, sample_rate: f32) {
        self.refresh_interval = (sample_rate / REFRESH_RATE_HZ) as usize;
        self.smoothing_coef = (-1.0 / (SMOOTHING_TIME_S * sample_rate)).exp();
    }

    fn publish_levels(&mut self) {
        for ch in 0..MAX_METERED_CHANNELS {
            let level_db = to_db(self.smoothed[ch]);
            let parameter_id = self.level_parameter_ids[ch];
            self.data.parameters().set_value(parameter_id, level_db);
            self.data.output_event(RtEvent::parameter_change(
                self.data.id(),
                0,
                parameter_id,
                level_db,
            ));
        }
    }
}

impl Default for PeakMeterPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PeakMeterPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> EngineResult<()> {
        self.update_refresh_interval(sample_rate);
        Ok(())
    }

    fn configure(&mut self, sample_rate: f32) {
        self.update_refresh_interval(sample_rate);
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        bypass_process(input, output);

        let channels = input.channel_count().min(MAX_METERED_CHANNELS);
        for ch in 0..channels {
            let mut peak: f32 = 0.0;
            for &sample in input.channel(ch) {
                peak = peak.max(sample.abs());
            }
            let decayed = self.smoothed[ch] * self.smoothing_coef.powi(AUDIO_CHUNK_SIZE as i32);
            self.smoothed[ch] = peak.max(decayed);
        }

        self.sample_count += AUDIO_CHUNK_SIZE;
        if self.sample_count >= self.refresh_interval {
            self.sample_count = 0;
            self.publish_levels();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::RtEventFifo;

    #[test]
    fn test_audio_passes_through() {
        let mut plugin = PeakMeterPlugin::new();
        plugin.init(48_000.0).unwrap();

        let mut input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(-0.5);

        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0)[0], 0.5);
        assert_eq!(output.channel(1)[0], -0.5);
    }

    #[test]
    fn test_levels_are_published_upstream() {
        let mut plugin = PeakMeterPlugin::new();
        plugin.init(48_000.0).unwrap();
        let sink: Arc<RtEventFifo<64>> = Arc::new(RtEventFifo::new());
        plugin.set_event_output(Some(sink.clone()));

        let mut input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        input.channel_mut(1).fill(1.0);

        // Enough chunks to pass one refresh interval (48000 / 25 = 1920
        // samples = 30 chunks)
        let mut published = Vec::new();
        for _ in 0..32 {
            plugin.process_audio(&input, &mut output);
            while let Some(event) = sink.pop() {
                published.push(event);
            }
        }

        assert_eq!(published.len(), 2);
        match published[0] {
            RtEvent::ParameterChange(e) => {
                assert_eq!(e.processor_id, plugin.id());
                // Full-scale input measures 0 dB
                assert!(e.value.abs() < 0.5);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_silence_measures_at_the_floor() {
        let mut plugin = PeakMeterPlugin::new();
        plugin.init(48_000.0).unwrap();
        let sink: Arc<RtEventFifo<64>> = Arc::new(RtEventFifo::new());
        plugin.set_event_output(Some(sink.clone()));

        let input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        for _ in 0..32 {
            plugin.process_audio(&input, &mut output);
        }

        match sink.pop() {
            Some(RtEvent::ParameterChange(e)) => assert_eq!(e.value, SILENCE_DB),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
