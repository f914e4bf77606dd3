//! Wheel-distance telemetry relay.
//!
//! The relay subscribes to up to [`MAX_WHEELS`] wheel topics and, once per
//! tick, merges every sample that arrived since the previous tick into a single
//! [`WheelDistance`] message. A tick without fresh samples sends nothing.
//!
//! Channel `i` always writes `distance[i]`. Slots of channels that did not
//! report keep the value from their last report, so downstream consumers can
//! key off the array index.

use core::fmt;

use embassy_time::{Duration, Ticker};
use heapless::Vec;
use serde::Serialize;

use crate::utils::{
    connection::topics::{SampleSource, WheelSample, MAX_WHEELS},
    math::distance::{DistanceConversion, PassThrough},
};

/// Name of the outbound telemetry stream.
pub const STREAM_NAME: &str = "ENCODER";
/// Message id of the outbound wheel-distance message.
pub const MESSAGE_ID: u16 = 9000;
/// Payload bytes: `time_usec` (8), `distance` (8 per slot), `count` (1).
pub const PAYLOAD_LEN: usize = 8 + 8 * MAX_WHEELS + 1;
/// Header and checksum bytes added by the outbound framing.
pub const FRAMING_LEN: usize = 12;

/// Aggregate of the latest wheel distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WheelDistance {
    /// Timestamp of the newest sample included in the last emission (us)
    pub time_usec: u64,
    /// Number of channels included in the last aggregation pass
    pub count: u8,
    /// Distance per channel, indexed by channel
    pub distance: [f64; MAX_WHEELS],
}

impl Default for WheelDistance {
    fn default() -> Self {
        Self {
            time_usec: 0,
            count: 0,
            distance: [0.0; MAX_WHEELS],
        }
    }
}

impl WheelDistance {
    /// Size of one framed message on the outbound link.
    pub const fn wire_size() -> usize {
        PAYLOAD_LEN + FRAMING_LEN
    }
}

/// Outbound transport for aggregated messages.
pub trait AggregateSink {
    type Error: fmt::Debug;

    fn send(
        &mut self,
        message: &WheelDistance,
    ) -> Result<(), Self::Error>;
}

/// Errors returned by [`TelemetryRelay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// Every slot of the outbound message is already taken.
    CapacityExceeded,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RelayError::CapacityExceeded => {
                write!(f, "cannot relay more than {} wheel channels", MAX_WHEELS)
            }
        }
    }
}

/// Per-channel cache of the last received sample.
pub struct ChannelSlot<S> {
    source: S,
    last_sample: Option<WheelSample>,
    fresh: bool,
}

impl<S: SampleSource> ChannelSlot<S> {
    fn new(source: S) -> Self {
        Self {
            source,
            last_sample: None,
            fresh: false,
        }
    }

    /// Pull a new sample from the source, if there is one.
    fn poll(&mut self) {
        if let Some(sample) = self.source.try_latest() {
            self.last_sample = Some(sample);
            self.fresh = true;
        }
    }

    /// The cached sample, if it has not been included in a sent message yet.
    fn fresh_sample(&self) -> Option<WheelSample> {
        self.last_sample.filter(|_| self.fresh)
    }

    pub fn last_sample(&self) -> Option<&WheelSample> {
        self.last_sample.as_ref()
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// Merges independently published wheel samples into [`WheelDistance`]
/// messages.
pub struct TelemetryRelay<S, C = PassThrough> {
    slots: Vec<ChannelSlot<S>, MAX_WHEELS>,
    message: WheelDistance,
    conversion: C,
}

impl<S: SampleSource> TelemetryRelay<S, PassThrough> {
    /// Relay that forwards raw encoder positions as distances.
    pub fn new() -> Self {
        Self::with_conversion(PassThrough)
    }
}

impl<S: SampleSource> Default for TelemetryRelay<S, PassThrough> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> TelemetryRelay<S, C>
where
    S: SampleSource,
    C: DistanceConversion,
{
    pub fn with_conversion(conversion: C) -> Self {
        Self {
            slots: Vec::new(),
            message: WheelDistance::default(),
            conversion,
        }
    }

    /// Add a channel and return its index in the outbound message.
    pub fn subscribe(
        &mut self,
        source: S,
    ) -> Result<usize, RelayError> {
        let index = self.slots.len();
        self.slots
            .push(ChannelSlot::new(source))
            .map_err(|_| RelayError::CapacityExceeded)?;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(
        &self,
        index: usize,
    ) -> Option<&ChannelSlot<S>> {
        self.slots.get(index)
    }

    /// The message as of the last aggregation pass.
    pub fn message(&self) -> &WheelDistance {
        &self.message
    }

    /// Scan every channel and fold fresh samples into the message without
    /// consuming them. Returns whether any channel contributed.
    fn fold(&mut self) -> bool {
        let mut count = 0u8;
        let mut newest: Option<u64> = None;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.poll();
            let Some(sample) = slot.fresh_sample() else {
                continue;
            };

            // TODO: switch the default to WheelCircumference once the wheels are calibrated.
            self.message.distance[index] = self
                .conversion
                .pulses_to_distance(sample.encoder_position, sample.pulses_per_rev);
            newest = Some(newest.map_or(sample.timestamp, |t| t.max(sample.timestamp)));
            count += 1;
        }

        self.message.count = count;
        match newest {
            Some(time_usec) => {
                self.message.time_usec = time_usec;
                true
            }
            None => false,
        }
    }

    fn consume(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.fresh = false;
        }
    }

    /// Scan every channel and fold fresh samples into the message.
    ///
    /// Returns the message when at least one channel contributed, `None`
    /// otherwise. Each sample contributes to exactly one aggregation pass.
    pub fn aggregate(&mut self) -> Option<&WheelDistance> {
        if !self.fold() {
            return None;
        }
        self.consume();
        Some(&self.message)
    }

    /// Aggregate and hand the message to `sink` if anything was fresh.
    ///
    /// Samples stay fresh until `sink` accepts the message, so a failed send
    /// is retried on the next tick. Returns whether a message was sent.
    pub fn on_tick<K: AggregateSink>(
        &mut self,
        sink: &mut K,
    ) -> Result<bool, K::Error> {
        if !self.fold() {
            return Ok(false);
        }
        tracing::trace!(count = self.message.count, time_usec = self.message.time_usec, "wheel distance");
        sink.send(&self.message)?;
        self.consume();
        Ok(true)
    }

    /// Relay loop: one aggregation pass every `tick`.
    pub async fn run<K: AggregateSink>(
        mut self,
        mut sink: K,
        tick: Duration,
    ) -> ! {
        let mut ticker = Ticker::every(tick);
        loop {
            ticker.next().await;
            if let Err(e) = self.on_tick(&mut sink) {
                tracing::error!("failed to send wheel distance: {:?}", e);
            }
        }
    }
}
