//! Parameter model: descriptors, pre-processors and lock-free live values
//!
//! Every processor owns a [`ParameterTable`]. Control threads write raw
//! values through it; the pre-processor runs at write time and the processed
//! result lands in an atomic cell the audio thread reads with relaxed
//! ordering. Readers never see torn values, writers never block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::{next_object_id, EngineError, EngineResult, ObjectId, Sample};

/// Gain values at or below this many dB are treated as silence
pub const SILENCE_FLOOR_DB: f32 = -120.0;

/// Value domain of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Float,
    Int,
    Bool,
    /// String-valued property; has no live atomic value, changes are
    /// delivered as events only
    String,
}

/// Pure function applied to a raw parameter value before storage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterPreProcessor {
    /// Pass the value through unchanged
    Identity,
    /// Clamp to the closed range
    Clamp { min: f32, max: f32 },
    /// Clamp in dB, then convert to a linear gain factor.
    /// Values at the silence floor map to exactly 0.0.
    DbToLinear { min: f32, max: f32 },
}

impl ParameterPreProcessor {
    #[inline]
    pub fn process(&self, raw: f32) -> f32 {
        match *self {
            Self::Identity => raw,
            Self::Clamp { min, max } => raw.clamp(min, max),
            Self::DbToLinear { min, max } => {
                let db = raw.clamp(min, max);
                if db <= SILENCE_FLOOR_DB {
                    0.0
                } else {
                    10.0_f32.powf(db / 20.0)
                }
            }
        }
    }
}

/// Immutable description of a registered parameter
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub id: ObjectId,
    /// Short machine-facing name, unique within the processor
    pub name: String,
    /// Human-facing display name
    pub label: String,
    pub parameter_type: ParameterType,
    pub default_value: f32,
    pub min_value: f32,
    pub max_value: f32,
    pub pre_processor: ParameterPreProcessor,
}

/// Live value of a numeric parameter.
///
/// Single-writer atomic cell pair: the raw (domain) value for control-side
/// reads and the processed value for the audio thread. Relaxed ordering is
/// sufficient; visibility at the next block boundary is all that is promised.
#[derive(Debug)]
pub struct ParameterValue {
    raw: AtomicU32,
    processed: AtomicU32,
}

impl ParameterValue {
    pub fn new(raw: f32, processed: f32) -> Self {
        Self {
            raw: AtomicU32::new(raw.to_bits()),
            processed: AtomicU32::new(processed.to_bits()),
        }
    }

    /// Processed value, as read on the audio thread
    #[inline]
    pub fn value(&self) -> Sample {
        f32::from_bits(self.processed.load(Ordering::Relaxed))
    }

    /// Raw (domain) value as last written
    #[inline]
    pub fn raw_value(&self) -> f32 {
        f32::from_bits(self.raw.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, raw: f32, processed: f32) {
        self.raw.store(raw.to_bits(), Ordering::Relaxed);
        self.processed.store(processed.to_bits(), Ordering::Relaxed);
    }
}

/// Per-processor parameter registry.
///
/// Registration happens before the processor enters the live graph; after
/// that the table is structurally immutable and only the atomic values move.
#[derive(Debug, Default)]
pub struct ParameterTable {
    descriptors: Vec<ParameterDescriptor>,
    values: Vec<Option<Arc<ParameterValue>>>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<ObjectId, usize>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &mut self,
        parameter_type: ParameterType,
        name: &str,
        label: &str,
        default_value: f32,
        min_value: f32,
        max_value: f32,
        pre_processor: ParameterPreProcessor,
    ) -> EngineResult<ParameterDescriptor> {
        if self.by_name.contains_key(name) {
            return Err(EngineError::InvalidParameter);
        }

        let descriptor = ParameterDescriptor {
            id: next_object_id(),
            name: name.to_string(),
            label: label.to_string(),
            parameter_type,
            default_value,
            min_value,
            max_value,
            pre_processor,
        };

        let index = self.descriptors.len();
        let value = match parameter_type {
            ParameterType::String => None,
            _ => Some(Arc::new(ParameterValue::new(
                default_value,
                pre_processor.process(default_value),
            ))),
        };

        self.by_name.insert(descriptor.name.clone(), index);
        self.by_id.insert(descriptor.id, index);
        self.values.push(value);
        self.descriptors.push(descriptor.clone());
        Ok(descriptor)
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
        let descriptor = self.register(
            ParameterType::Float,
            name,
            label,
            default_value,
            min_value,
            max_value,
            pre_processor,
        )?;
        Ok(self.value(descriptor.id).expect("numeric parameter"))
    }

    pub fn register_int_parameter(
        &mut self,
        name: &str,
        label: &str,
        default_value: i32,
        min_value: i32,
        max_value: i32,
    ) -> EngineResult<Arc<ParameterValue>> {
        let descriptor = self.register(
            ParameterType::Int,
            name,
            label,
            default_value as f32,
            min_value as f32,
            max_value as f32,
            ParameterPreProcessor::Clamp {
                min: min_value as f32,
                max: max_value as f32,
            },
        )?;
        Ok(self.value(descriptor.id).expect("numeric parameter"))
    }

    pub fn register_bool_parameter(
        &mut self,
        name: &str,
        label: &str,
        default_value: bool,
    ) -> EngineResult<Arc<ParameterValue>> {
        let descriptor = self.register(
            ParameterType::Bool,
            name,
            label,
            if default_value { 1.0 } else { 0.0 },
            0.0,
            1.0,
            ParameterPreProcessor::Clamp { min: 0.0, max: 1.0 },
        )?;
        Ok(self.value(descriptor.id).expect("numeric parameter"))
    }

    /// Register a string-valued property. Changes arrive as events; there is
    /// no live atomic value.
    pub fn register_string_property(&mut self, name: &str, label: &str) -> EngineResult<ObjectId> {
        let descriptor = self.register(
            ParameterType::String,
            name,
            label,
            0.0,
            0.0,
            0.0,
            ParameterPreProcessor::Identity,
        )?;
        Ok(descriptor.id)
    }

    pub fn descriptor(&self, id: ObjectId) -> Option<&ParameterDescriptor> {
        self.by_id.get(&id).map(|&i| &self.descriptors[i])
    }

    pub fn descriptor_from_name(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.by_name.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    pub fn value(&self, id: ObjectId) -> Option<Arc<ParameterValue>> {
        self.by_id
            .get(&id)
            .and_then(|&i| self.values[i].as_ref())
            .cloned()
    }

    /// Apply a raw value through the parameter's pre-processor and publish it.
    ///
    /// Returns `false` for unknown ids and string properties.
    pub fn set_value(&self, id: ObjectId, raw: f32) -> bool {
        match self.by_id.get(&id) {
            Some(&index) => match &self.values[index] {
                Some(value) => {
                    let processed = self.descriptors[index].pre_processor.process(raw);
                    value.store(raw, processed);
                    true
                }
                None => false,
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_processor_clamp() {
        let pre = ParameterPreProcessor::Clamp {
            min: -1.0,
            max: 1.0,
        };
        assert_eq!(pre.process(0.5), 0.5);
        assert_eq!(pre.process(2.0), 1.0);
        assert_eq!(pre.process(-3.0), -1.0);
    }

    #[test]
    fn test_pre_processor_db_to_linear() {
        let pre = ParameterPreProcessor::DbToLinear {
            min: -120.0,
            max: 24.0,
        };
        assert!((pre.process(0.0) - 1.0).abs() < 1e-6);
        assert!((pre.process(-6.0) - 0.501_187).abs() < 1e-5);
        assert!((pre.process(20.0) - 10.0).abs() < 1e-5);
        // Below the silence floor the gain is a hard zero
        assert_eq!(pre.process(-120.0), 0.0);
        assert_eq!(pre.process(-500.0), 0.0);
    }

    #[test]
    fn test_register_and_set() {
        let mut table = ParameterTable::new();
        let value = table
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
            .unwrap();

        // Defaults run through the pre-processor
        assert!((value.value() - 1.0).abs() < 1e-6);
        assert_eq!(value.raw_value(), 0.0);

        let id = table.descriptor_from_name("gain").unwrap().id;
        assert!(table.set_value(id, -6.0));
        assert_eq!(value.raw_value(), -6.0);
        assert!((value.value() - 0.501_187).abs() < 1e-5);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut table = ParameterTable::new();
        table
            .register_bool_parameter("enabled", "Enabled", true)
            .unwrap();
        let result = table.register_bool_parameter("enabled", "Enabled", false);
        assert_eq!(result.unwrap_err(), EngineError::InvalidParameter);
    }

    #[test]
    fn test_string_property_has_no_live_value() {
        let mut table = ParameterTable::new();
        let id = table
            .register_string_property("sample_file", "Sample File")
            .unwrap();
        assert!(table.value(id).is_none());
        assert!(!table.set_value(id, 1.0));
        assert_eq!(
            table.descriptor(id).unwrap().parameter_type,
            ParameterType::String
        );
    }
}
