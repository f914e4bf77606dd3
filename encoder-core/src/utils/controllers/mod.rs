//! Module Exports
//!
//! This file exports the encoder driver and the controller that schedules one
//! driver per configured board.
//!
//! - `config`: static per-board configuration.
//! - `i2c`: the encoder board driver and its poll/decode state machine.

pub mod config;
/// Module for the I2C encoder board driver.
pub mod i2c;

use core::{cell::RefCell, fmt};

use embassy_sync::{
    blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex},
    channel::Channel,
    watch::Sender,
};
use embassy_time::{with_timeout, Instant};
use embedded_hal::i2c::I2c;
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub use config::DriverConfig;
pub use i2c::{DeviceError, DriverState, DriverStatus, EncoderDriver};

use crate::utils::connection::topics::{WheelSample, WheelTopic, MAX_WHEELS};

/// Each board drives two wheel topics.
pub const MAX_INSTANCES: usize = MAX_WHEELS / 2;

/// Channel used to receive lifecycle commands (`DriverCommand` messages).
pub static DRIVER_CHANNEL: Channel<CriticalSectionRawMutex, DriverCommand, 4> = Channel::new();

/// Lifecycle verbs applied to every encoder instance.
///
/// Serialized as JSON with tag `"dc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "dc", rename_all = "snake_case")] // dc = driver command
pub enum DriverCommand {
    /// Probe every board and start polling the ones that answer.
    Start,
    /// Stop polling every board.
    Stop,
    /// Log a status line per board.
    Status,
}

/// Write side of a wheel topic as held by a driver instance.
pub type WheelSender<'a, M> = Sender<'a, M, WheelSample, 1>;

struct Instance<'a, I2C, M: RawMutex> {
    driver: EncoderDriver<'a, I2C, WheelSender<'a, M>>,
    next_due: Option<Instant>,
}

/// Collection of encoder driver instances sharing one I2C bus.
///
/// Instance `i` publishes its left wheel on topic `2i` and its right wheel on
/// topic `2i + 1`.
pub struct EncoderController<'a, I2C, M: RawMutex> {
    instances: Vec<Instance<'a, I2C, M>, MAX_INSTANCES>,
}

impl<'a, I2C, E, M> EncoderController<'a, I2C, M>
where
    I2C: I2c<Error = E>,
    E: fmt::Debug,
    M: RawMutex,
{
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        configs: &[DriverConfig],
        topics: &'a [WheelTopic<M>],
    ) -> Self {
        let mut instances = Vec::new();

        for (index, config) in configs.iter().enumerate() {
            let (Some(left), Some(right)) = (topics.get(2 * index), topics.get(2 * index + 1))
            else {
                tracing::warn!("no wheel topics left for encoder at 0x{:02X}", config.address);
                break;
            };

            let driver = EncoderDriver::new(i2c_bus, *config, [left.sender(), right.sender()]);
            if instances
                .push(Instance {
                    driver,
                    next_due: None,
                })
                .is_err()
            {
                tracing::warn!("too many encoder instances, ignoring 0x{:02X}", config.address);
                break;
            }
            tracing::debug!(
                "encoder instance {} at 0x{:02X} (device type 0x{:02X})",
                index,
                config.address,
                i2c::DEVICE_TYPE
            );
        }

        EncoderController { instances }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Driver of instance `index`, if it exists.
    pub fn driver(
        &self,
        index: usize,
    ) -> Option<&EncoderDriver<'a, I2C, WheelSender<'a, M>>> {
        self.instances.get(index).map(|instance| &instance.driver)
    }

    /// Deadline of the next cycle of instance `index`, if it is scheduled.
    pub fn next_due(
        &self,
        index: usize,
    ) -> Option<Instant> {
        self.instances.get(index).and_then(|instance| instance.next_due)
    }

    /// Initialize every instance and schedule those whose probe succeeded.
    ///
    /// Returns the number of instances now polling.
    pub fn start(
        &mut self,
        now: Instant,
    ) -> usize {
        let mut started = 0;
        for instance in self.instances.iter_mut() {
            instance.next_due = match instance.driver.start() {
                Ok(delay) => {
                    started += 1;
                    Some(now + delay)
                }
                Err(_) => None,
            };
        }

        if started == 0 && !self.instances.is_empty() {
            tracing::error!("no encoder board answered the probe");
        }
        started
    }

    pub fn stop(&mut self) {
        for instance in self.instances.iter_mut() {
            instance.driver.stop();
            instance.next_due = None;
        }
    }

    /// Status snapshot of every instance.
    pub fn status(&self) -> Vec<DriverStatus, MAX_INSTANCES> {
        self.instances
            .iter()
            .map(|instance| instance.driver.status())
            .collect()
    }

    /// Execute a lifecycle `DriverCommand`.
    pub fn execute_command(
        &mut self,
        command: DriverCommand,
        now: Instant,
    ) {
        match command {
            DriverCommand::Start => {
                let started = self.start(now);
                tracing::info!(started, total = self.instances.len(), "encoders started");
            }
            DriverCommand::Stop => self.stop(),
            DriverCommand::Status => {
                for status in self.status() {
                    tracing::info!(?status, "encoder status");
                }
            }
        }
    }

    /// Run every instance whose deadline has passed and reschedule it.
    ///
    /// Returns the earliest pending deadline, or `None` when nothing is
    /// scheduled.
    pub fn poll_due(
        &mut self,
        now: Instant,
    ) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;

        for instance in self.instances.iter_mut() {
            if let Some(due) = instance.next_due {
                if due <= now {
                    instance.next_due = instance.driver.run_cycle(now).map(|delay| now + delay);
                }
            }

            if let Some(due) = instance.next_due {
                earliest = Some(earliest.map_or(due, |e| e.min(due)));
            }
        }

        earliest
    }

    /// Scheduling loop: run due cycles, otherwise wait for the next deadline or
    /// a command on `DRIVER_CHANNEL`, whichever comes first.
    pub async fn driver_ch(&mut self) -> ! {
        loop {
            let command = match self.poll_due(Instant::now()) {
                Some(due) => {
                    let wait = due.saturating_duration_since(Instant::now());
                    with_timeout(wait, DRIVER_CHANNEL.receive()).await.ok()
                }
                None => Some(DRIVER_CHANNEL.receive().await),
            };

            if let Some(command) = command {
                tracing::info!("Received driver command: {:?}", command);
                self.execute_command(command, Instant::now());
            }
        }
    }
}
