//! Smoothing of control values over a set time period
//!
//! Two modes: a linear ramp that reaches the target in exactly the lag
//! time, and a one-pole lowpass where the lag time is the 90% rise time.
//! Used by plugins to avoid zipper noise when a parameter jumps.

use std::time::Duration;

const RISE_TIME_CONSTANT: f32 = 2.19;
const STATIONARY_LIMIT: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingMode {
    /// Linear ramp over the lag time
    Ramp,
    /// One-pole lowpass filter, lag time = 90% rise time
    Filter,
}

#[derive(Debug, Clone)]
pub struct ValueSmoother {
    mode: SmoothingMode,
    current: f32,
    target: f32,
    // Ramp state
    step: f32,
    count: u32,
    steps: u32,
    // Filter state
    coeff: f32,
}

impl ValueSmoother {
    pub fn new(mode: SmoothingMode, lag_time: Duration, sample_rate: f32) -> Self {
        let mut smoother = Self {
            mode,
            current: 0.0,
            target: 0.0,
            step: 0.0,
            count: 0,
            steps: 1,
            coeff: 0.0,
        };
        smoother.set_lag_time(lag_time, sample_rate);
        smoother
    }

    pub fn with_initial_value(
        mode: SmoothingMode,
        lag_time: Duration,
        sample_rate: f32,
        value: f32,
    ) -> Self {
        let mut smoother = Self::new(mode, lag_time, sample_rate);
        smoother.set_direct(value);
        smoother
    }

    /// Set the desired value and start moving towards it. Setting the
    /// current target again does not restart an ongoing ramp.
    pub fn set(&mut self, value: f32) {
        if value == self.target {
            return;
        }
        self.target = value;
        if self.mode == SmoothingMode::Ramp {
            self.step = (self.target - self.current) / self.steps as f32;
            self.count = self.steps;
        }
    }

    /// Jump to the value with no smoothing
    pub fn set_direct(&mut self, value: f32) {
        self.target = value;
        self.current = value;
        if self.mode == SmoothingMode::Ramp {
            self.count = 0;
        }
    }

    /// Read the current value without advancing
    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Advance one sample and return the new current value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        match self.mode {
            SmoothingMode::Ramp => {
                if self.count > 0 {
                    self.count -= 1;
                    self.current += self.step;
                } else {
                    self.current = self.target;
                }
                self.current
            }
            SmoothingMode::Filter => {
                self.current = (1.0 - self.coeff) * self.target + self.coeff * self.current;
                self.current
            }
        }
    }

    /// Whether the value has reached the target
    pub fn stationary(&self) -> bool {
        match self.mode {
            SmoothingMode::Ramp => self.count == 0,
            SmoothingMode::Filter => (self.target - self.current).abs() < STATIONARY_LIMIT,
        }
    }

    pub fn set_lag_time(&mut self, lag_time: Duration, sample_rate: f32) {
        let lag_seconds = lag_time.as_secs_f32();
        match self.mode {
            SmoothingMode::Ramp => {
                self.steps = (lag_seconds * sample_rate).round().max(1.0) as u32;
            }
            SmoothingMode::Filter => {
                self.coeff = (-RISE_TIME_CONSTANT / (lag_seconds * sample_rate)).exp();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_reaches_target_in_lag_time() {
        let mut smoother = ValueSmoother::new(SmoothingMode::Ramp, Duration::from_millis(1), 1000.0);
        smoother.set(1.0);
        assert!(!smoother.stationary());

        // 1 ms at 1 kHz is a single step
        assert!((smoother.next_value() - 1.0).abs() < 1e-6);
        assert!(smoother.stationary());
    }

    #[test]
    fn test_ramp_is_linear() {
        let mut smoother =
            ValueSmoother::new(SmoothingMode::Ramp, Duration::from_millis(4), 1000.0);
        smoother.set(1.0);
        assert!((smoother.next_value() - 0.25).abs() < 1e-6);
        assert!((smoother.next_value() - 0.5).abs() < 1e-6);
        assert!((smoother.next_value() - 0.75).abs() < 1e-6);
        assert!((smoother.next_value() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_filter_converges_monotonically() {
        let mut smoother =
            ValueSmoother::new(SmoothingMode::Filter, Duration::from_millis(10), 48_000.0);
        smoother.set(1.0);

        let mut previous = 0.0;
        for _ in 0..48 * 50 {
            let value = smoother.next_value();
            assert!(value >= previous);
            previous = value;
        }
        assert!(smoother.stationary());
        assert!((previous - 1.0).abs() < STATIONARY_LIMIT);
    }

    #[test]
    fn test_set_direct_skips_smoothing() {
        let mut smoother =
            ValueSmoother::new(SmoothingMode::Ramp, Duration::from_millis(10), 48_000.0);
        smoother.set_direct(0.5);
        assert_eq!(smoother.value(), 0.5);
        assert!(smoother.stationary());
    }
}
