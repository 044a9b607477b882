//! sg-plugins: internal DSP plugins for the Soundgraph engine

mod gain;
mod passthrough;
mod peak_meter;
mod smoother;

pub use gain::{GainPlugin, GAIN_PLUGIN_UID};
pub use passthrough::{PassthroughPlugin, PASSTHROUGH_PLUGIN_UID};
pub use peak_meter::{PeakMeterPlugin, PEAK_METER_PLUGIN_UID};
pub use smoother::{SmoothingMode, ValueSmoother};

use sg_engine::AudioEngine;

/// Register every built-in plugin factory with an engine
pub fn register_default_plugins(engine: &mut AudioEngine) {
    engine.register_plugin_factory(
        PASSTHROUGH_PLUGIN_UID,
        Box::new(|| Box::new(PassthroughPlugin::new())),
    );
    engine.register_plugin_factory(GAIN_PLUGIN_UID, Box::new(|| Box::new(GainPlugin::new())));
    engine.register_plugin_factory(
        PEAK_METER_PLUGIN_UID,
        Box::new(|| Box::new(PeakMeterPlugin::new())),
    );
    log::info!("Registered built-in plugin factories");
}
