//! Per-wheel sample topics.
//!
//! Every physical wheel gets its own latest-value cell. Drivers publish into a
//! cell through [`SamplePublisher`] and the telemetry relay polls it through
//! [`SampleSource`]. The embassy implementation backs each cell with a
//! [`Watch`], whose receivers remember the last value they observed, which
//! gives the relay poll-and-consume semantics for free.

use embassy_sync::{
    blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex},
    watch::{Receiver, Sender, Watch},
};
use serde::{Deserialize, Serialize};

/// Capacity of the outbound wheel-distance message, and therefore the number
/// of wheel channels that can be relayed.
pub const MAX_WHEELS: usize = 16;

/// One decoded reading for one wheel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelSample {
    /// Monotonic acquisition time (us)
    pub timestamp: u64,
    /// Accumulated encoder steps, wrapping on overflow
    pub encoder_position: i32,
    /// Raw speed metric reported by the board
    pub speed: i32,
    /// Static per-channel configuration, never decoded from the bus
    pub pulses_per_rev: u32,
}

/// Single-subscriber latest-value cell for one wheel.
pub type WheelTopic<M> = Watch<M, WheelSample, 1>;

/// Wheel topics shared between driver and relay tasks.
pub static WHEEL_TOPICS: [WheelTopic<CriticalSectionRawMutex>; MAX_WHEELS] =
    [const { Watch::new() }; MAX_WHEELS];

/// Write side of a wheel topic.
pub trait SamplePublisher {
    fn publish(
        &mut self,
        sample: WheelSample,
    );
}

/// Read side of a wheel topic.
pub trait SampleSource {
    /// Return the latest sample if it changed since the previous call.
    fn try_latest(&mut self) -> Option<WheelSample>;
}

impl<M: RawMutex, const N: usize> SamplePublisher for Sender<'_, M, WheelSample, N> {
    fn publish(
        &mut self,
        sample: WheelSample,
    ) {
        self.send(sample);
    }
}

impl<M: RawMutex, const N: usize> SampleSource for Receiver<'_, M, WheelSample, N> {
    fn try_latest(&mut self) -> Option<WheelSample> {
        self.try_changed()
    }
}
