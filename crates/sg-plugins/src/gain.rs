//! Gain utility plugin
//!
//! One dB-scaled gain parameter, applied with a short linear ramp so jumps
//! do not produce zipper noise.

use std::sync::Arc;
use std::time::Duration;

use sg_core::{
    ChunkSampleBuffer, EngineResult, ParameterPreProcessor, ParameterValue, Sample,
    AUDIO_CHUNK_SIZE,
};
use sg_engine::{bypass_process, Processor, ProcessorData};

use crate::smoother::{SmoothingMode, ValueSmoother};

pub const GAIN_PLUGIN_UID: &str = "sg.gain";

const MAX_CHANNELS: usize = 2;
const GAIN_SMOOTHING_LAG: Duration = Duration::from_millis(5);

pub struct GainPlugin {
    data: ProcessorData,
    gain_parameter: Arc<ParameterValue>,
    smoother: ValueSmoother,
}

impl GainPlugin {
    pub fn new() -> Self {
        let mut data = ProcessorData::new(MAX_CHANNELS, MAX_CHANNELS);
        let gain_parameter = data
            .register_float_parameter(
                "gain",
                "Gain",
                0.0,
                -120.0,
                24.0,
                ParameterPreProcessor::DbToLinear {
                    min: -120.0,
                    max: 24.0,
                },
            )
            .expect("parameter registration on a fresh processor");

        Self {
            data,
            smoother: ValueSmoother::with_initial_value(
                SmoothingMode::Ramp,
                GAIN_SMOOTHING_LAG,
                48_000.0,
                gain_parameter.value(),
            ),
            gain_parameter,
        }
    }
}

impl Default for GainPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for GainPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn init(&mut self, sample_rate: f32) -> EngineResult<()> {
        self.configure(sample_rate);
        Ok(())
    }

    fn configure(&mut self, sample_rate: f32) {
        self.smoother.set_lag_time(GAIN_SMOOTHING_LAG, sample_rate);
        self.smoother.set_direct(self.gain_parameter.value());
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        if self.data.bypassed() {
            bypass_process(input, output);
            return;
        }

        self.smoother.set(self.gain_parameter.value());
        let channels = input.channel_count().min(output.channel_count());

        if self.smoother.stationary() {
            let gain = self.smoother.value();
            for ch in 0..channels {
                let source = input.channel(ch);
                for (out, sample) in output.channel_mut(ch).iter_mut().zip(source.iter()) {
                    *out = *sample * gain;
                }
            }
        } else {
            let mut ramp = [0.0 as Sample; AUDIO_CHUNK_SIZE];
            for value in ramp.iter_mut() {
                *value = self.smoother.next_value();
            }
            for ch in 0..channels {
                let source = input.channel(ch);
                let destination = output.channel_mut(ch);
                for i in 0..AUDIO_CHUNK_SIZE {
                    destination[i] = source[i] * ramp[i];
                }
            }
        }

        for ch in channels..output.channel_count() {
            output.channel_mut(ch).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::RtEvent;

    #[test]
    fn test_unity_gain_by_default() {
        let mut plugin = GainPlugin::new();
        plugin.init(48_000.0).unwrap();

        let mut input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(0.5);

        plugin.process_audio(&input, &mut output);
        assert!((output.channel(0)[0] - 0.5).abs() < 1e-6);
        assert!((output.channel(1)[AUDIO_CHUNK_SIZE - 1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_gain_change_settles_on_target() {
        let mut plugin = GainPlugin::new();
        plugin.init(48_000.0).unwrap();
        let parameter_id = plugin
            .data()
            .parameters()
            .descriptor_from_name("gain")
            .unwrap()
            .id;

        // -6 dB
        plugin.process_event(RtEvent::parameter_change(
            plugin.id(),
            0,
            parameter_id,
            -6.0,
        ));

        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        input.channel_mut(1).fill(1.0);
        let mut output = ChunkSampleBuffer::new(2);

        // Let the ramp finish, then verify the settled gain
        for _ in 0..8 {
            plugin.process_audio(&input, &mut output);
        }
        assert!((output.channel(0)[AUDIO_CHUNK_SIZE - 1] - 0.501_187).abs() < 1e-4);
    }

    #[test]
    fn test_bypass_is_identity() {
        let mut plugin = GainPlugin::new();
        plugin.init(48_000.0).unwrap();
        let parameter_id = plugin
            .data()
            .parameters()
            .descriptor_from_name("gain")
            .unwrap()
            .id;
        plugin.process_event(RtEvent::parameter_change(
            plugin.id(),
            0,
            parameter_id,
            -20.0,
        ));
        plugin.set_bypassed(true);

        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(0.7);
        input.channel_mut(1).fill(0.7);
        let mut output = ChunkSampleBuffer::new(2);

        plugin.process_audio(&input, &mut output);
        assert_eq!(output.channel(0)[0], 0.7);
        assert_eq!(output.channel(1)[0], 0.7);
    }
}
