//! Conversion from accumulated encoder pulses to travelled distance.
//!
//! The relay is generic over a [`DistanceConversion`]. [`PassThrough`] forwards
//! the raw position unchanged and is what the relay uses unless told otherwise,
//! since the wheels have not been calibrated yet. [`WheelCircumference`] is the
//! geometric conversion for a known wheel radius.
//!
//! # Example
//! ```rust
//! use encoder_core::utils::math::distance::{DistanceConversion, WheelCircumference};
//! let wheel = WheelCircumference::new(0.148);
//! let metres = wheel.pulses_to_distance(4, 2);
//! assert!((metres - 2.0 * 2.0 * core::f32::consts::PI as f64 * 0.148).abs() < 1e-3);
//! ```

use core::f32::consts::PI;

/// Strategy turning an encoder position into a distance value.
pub trait DistanceConversion {
    fn pulses_to_distance(
        &self,
        position: i32,
        pulses_per_rev: u32,
    ) -> f64;
}

/// Forwards the raw position as the distance.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl DistanceConversion for PassThrough {
    fn pulses_to_distance(
        &self,
        position: i32,
        _pulses_per_rev: u32,
    ) -> f64 {
        f64::from(position)
    }
}

/// Distance along the ground for a wheel of the given radius (m).
#[derive(Debug, Clone, Copy)]
pub struct WheelCircumference {
    /// Radius of the wheel (m)
    wheel_radius: f32,
    /// Precomputed circumference (m)
    circumference: f32,
}

impl WheelCircumference {
    pub fn new(wheel_radius: f32) -> Self {
        Self {
            wheel_radius,
            circumference: 2.0 * PI * wheel_radius,
        }
    }

    pub fn wheel_radius(&self) -> f32 {
        self.wheel_radius
    }
}

impl DistanceConversion for WheelCircumference {
    /// A zero `pulses_per_rev` yields `0.0` rather than dividing by zero.
    fn pulses_to_distance(
        &self,
        position: i32,
        pulses_per_rev: u32,
    ) -> f64 {
        if pulses_per_rev == 0 {
            return 0.0;
        }
        let revolutions = f64::from(position) / f64::from(pulses_per_rev);
        revolutions * f64::from(self.circumference)
    }
}
