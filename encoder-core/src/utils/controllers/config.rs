//! Static configuration for one encoder board instance.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::utils::math::codec::SpeedLayout;

/// Default 7-bit I2C address of the encoder board.
pub const DEFAULT_ADDRESS: u8 = 0x02;
/// Default delay between two data register reads (us).
pub const DEFAULT_POLL_INTERVAL_US: u64 = 50_000;
/// Default encoder resolution for both wheels.
pub const DEFAULT_PULSES_PER_REV: u32 = 2;
/// Default bus clock requested from the platform I2C peripheral.
pub const DEFAULT_BUS_FREQUENCY_HZ: u32 = 400_000;

/// Configuration passed to an `EncoderDriver` at construction.
///
/// Every field has a default, so a partial JSON object such as
/// `{"address": 3}` is a valid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub address: u8,
    pub poll_interval_us: u64,
    pub pulses_per_rev: u32,
    pub speed_layout: SpeedLayout,
    pub bus_frequency_hz: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            pulses_per_rev: DEFAULT_PULSES_PER_REV,
            speed_layout: SpeedLayout::LowByte,
            bus_frequency_hz: DEFAULT_BUS_FREQUENCY_HZ,
        }
    }
}

impl DriverConfig {
    /// Default configuration for a board at `address`.
    pub fn at(address: u8) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}
