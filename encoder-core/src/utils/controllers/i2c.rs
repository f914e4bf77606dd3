//! I2C driver for the dual-channel wheel encoder board.
//!
//! The board exposes a one-byte identity register and a 12-byte data register
//! holding both wheels' position and speed. [`EncoderDriver`] verifies the
//! identity once, then reads the data register every poll interval and
//! publishes one [`WheelSample`] per wheel.
//!
//! The driver does not own a timer. [`EncoderDriver::init`] and
//! [`EncoderDriver::run_cycle`] return the delay before the next cycle and the
//! caller (see `EncoderController`) does the waiting.

use core::{cell::RefCell, fmt};

use embassy_time::{Duration, Instant};
use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use serde::Serialize;

use crate::utils::{
    connection::topics::{SamplePublisher, WheelSample},
    controllers::config::DriverConfig,
    math::codec::{self, MalformedPayload, PAYLOAD_LEN},
};

/// Device type reported when enumerating encoder instances.
pub const DEVICE_TYPE: u8 = 0xE0;
/// Value of the identity register on a genuine encoder board.
pub const IDENTITY_MARKER: u8 = b'N';

/// Index of the left wheel within a driver instance.
pub const LEFT: usize = 0;
/// Index of the right wheel within a driver instance.
pub const RIGHT: usize = 1;

/// Command bytes understood by the encoder board.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// One byte, always [`IDENTITY_MARKER`].
    Identity = 0x00,
    /// Twelve bytes, see `math::codec`.
    Data = 0x01,
    /// Pulses per revolution as stored on the board. Not read; the driver uses
    /// its configured value.
    PulsesPerRev = 0x02,
}

/// Errors that can occur when talking to the encoder board.
#[derive(Debug)]
pub enum DeviceError<E: fmt::Debug> {
    /// The underlying bus transfer failed.
    Bus(E),
    /// The identity register did not hold [`IDENTITY_MARKER`].
    IdentityMismatch { found: u8 },
    /// The data register returned a frame of the wrong length.
    MalformedPayload(MalformedPayload),
}

impl<E: fmt::Debug> fmt::Display for DeviceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceError::Bus(e) => write!(f, "I2C error: {:?}", e),
            DeviceError::IdentityMismatch { found } => {
                write!(f, "unexpected encoder identity 0x{:02X}", found)
            }
            DeviceError::MalformedPayload(e) => write!(f, "malformed payload: {}", e),
        }
    }
}

/// Lifecycle of a driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Uninitialized,
    Probing,
    Polling,
    Stopped,
}

/// Counters reported through [`EncoderDriver::status`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PerfCounters {
    /// Data register reads attempted.
    pub reads: u32,
    /// Reads that failed on the bus or returned an unusable frame.
    pub comms_errors: u32,
    /// Cycles that published both wheels.
    pub published: u32,
}

/// Snapshot of one driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriverStatus {
    pub address: u8,
    pub state: DriverState,
    pub counters: PerfCounters,
    pub left: WheelSample,
    pub right: WheelSample,
}

/// Poll/decode state machine for one encoder board on a shared I2C bus.
pub struct EncoderDriver<'a, I2C, P> {
    i2c: RefCellDevice<'a, I2C>,
    config: DriverConfig,
    state: DriverState,
    samples: [WheelSample; 2],
    publishers: [P; 2],
    perf: PerfCounters,
}

impl<'a, I2C, E, P> EncoderDriver<'a, I2C, P>
where
    I2C: I2c<Error = E>,
    E: fmt::Debug,
    P: SamplePublisher,
{
    /// Create a driver for the board described by `config`.
    ///
    /// `publishers` are the left and right wheel topics, in that order.
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        config: DriverConfig,
        publishers: [P; 2],
    ) -> Self {
        EncoderDriver {
            i2c: RefCellDevice::new(i2c_bus),
            config,
            state: DriverState::Uninitialized,
            samples: [WheelSample::default(); 2],
            publishers,
            perf: PerfCounters::default(),
        }
    }

    fn read_register(
        &mut self,
        register: Register,
        buffer: &mut [u8],
    ) -> Result<(), DeviceError<E>> {
        self.i2c
            .write_read(self.config.address, &[register as u8], buffer)
            .map_err(DeviceError::Bus)
    }

    /// Read the identity register and check it against [`IDENTITY_MARKER`].
    pub fn probe(&mut self) -> Result<(), DeviceError<E>> {
        let mut id = [0u8; 1];
        self.read_register(Register::Identity, &mut id)?;
        tracing::debug!(address = self.config.address, id = id[0], "encoder identity");

        if id[0] == IDENTITY_MARKER {
            Ok(())
        } else {
            Err(DeviceError::IdentityMismatch { found: id[0] })
        }
    }

    /// Apply the static configuration and probe the board.
    ///
    /// On success the driver is polling and the returned duration is the delay
    /// before the first cycle. On failure the driver stays uninitialized and
    /// must not be scheduled.
    pub fn init(&mut self) -> Result<Duration, DeviceError<E>> {
        for sample in self.samples.iter_mut() {
            sample.pulses_per_rev = self.config.pulses_per_rev;
        }

        self.state = DriverState::Probing;
        match self.probe() {
            Ok(()) => {
                self.state = DriverState::Polling;
                tracing::info!(
                    address = self.config.address,
                    interval_us = self.config.poll_interval_us,
                    bus_hz = self.config.bus_frequency_hz,
                    "encoder polling"
                );
                Ok(self.config.poll_interval())
            }
            Err(e) => {
                self.state = DriverState::Uninitialized;
                tracing::warn!(address = self.config.address, "encoder probe failed: {:?}", e);
                Err(e)
            }
        }
    }

    /// Alias for [`init`](Self::init), used by the `start` lifecycle verb.
    pub fn start(&mut self) -> Result<Duration, DeviceError<E>> {
        self.init()
    }

    /// Stop polling. The scheduler drops the instance until it is started again.
    pub fn stop(&mut self) {
        if self.state == DriverState::Polling {
            tracing::info!(address = self.config.address, "encoder stopped");
        }
        self.state = DriverState::Stopped;
    }

    /// Run one scheduled cycle.
    ///
    /// Collection errors are counted and swallowed; the next cycle is always
    /// requested while the driver is polling. Returns `None` when the driver is
    /// not polling.
    pub fn run_cycle(
        &mut self,
        now: Instant,
    ) -> Option<Duration> {
        if self.state != DriverState::Polling {
            return None;
        }

        if let Err(e) = self.collect(now) {
            tracing::debug!(address = self.config.address, "collection error: {:?}", e);
        }
        Some(self.config.poll_interval())
    }

    /// Read and decode the data register, then publish left and right.
    ///
    /// On failure the output slots keep their previous samples and nothing is
    /// published.
    pub fn collect(
        &mut self,
        now: Instant,
    ) -> Result<(), DeviceError<E>> {
        self.perf.reads = self.perf.reads.wrapping_add(1);

        let layout = self.config.speed_layout;
        let mut data = [0u8; PAYLOAD_LEN];
        let decoded = self
            .read_register(Register::Data, &mut data)
            .and_then(|()| codec::decode_with(&data, layout).map_err(DeviceError::MalformedPayload));

        let (left, right) = match decoded {
            Ok(pair) => pair,
            Err(e) => {
                self.perf.comms_errors = self.perf.comms_errors.wrapping_add(1);
                return Err(e);
            }
        };

        let timestamp = now.as_micros();
        for (slot, decoded) in self.samples.iter_mut().zip([left, right]) {
            *slot = WheelSample {
                timestamp,
                pulses_per_rev: slot.pulses_per_rev,
                ..decoded
            };
        }

        // Left is always published before right.
        for (publisher, sample) in self.publishers.iter_mut().zip(self.samples) {
            publisher.publish(sample);
        }
        self.perf.published = self.perf.published.wrapping_add(1);
        Ok(())
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn comms_errors(&self) -> u32 {
        self.perf.comms_errors
    }

    pub fn counters(&self) -> PerfCounters {
        self.perf
    }

    /// Last samples written by a successful collect, `[left, right]`.
    pub fn samples(&self) -> &[WheelSample; 2] {
        &self.samples
    }

    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            address: self.config.address,
            state: self.state,
            counters: self.perf,
            left: self.samples[LEFT],
            right: self.samples[RIGHT],
        }
    }
}
