//! Payload decoding for the dual-channel encoder board.
//!
//! A data register read returns a fixed 12-byte big-endian frame:
//!
//! | Offset | Field                  |
//! |--------|------------------------|
//! | 0..4   | left encoder position  |
//! | 4..6   | left speed             |
//! | 6..10  | right encoder position |
//! | 10..12 | right speed            |
//!
//! Decoding is pure: timestamps and pulses-per-revolution are left at zero for
//! the driver to fill in.
//!
//! # Example
//! ```rust
//! use encoder_core::utils::math::codec;
//! let raw: [u8; 12] = [0, 0, 0, 5, 0, 7, 0, 0, 0, 3, 0, 9];
//! let (left, right) = codec::decode(&raw).unwrap();
//! assert_eq!((left.encoder_position, left.speed), (5, 7));
//! assert_eq!((right.encoder_position, right.speed), (3, 9));
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::connection::topics::WheelSample;

/// Length of a data register frame in bytes.
pub const PAYLOAD_LEN: usize = 12;

/// Returned when a frame is not exactly [`PAYLOAD_LEN`] bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedPayload {
    pub len: usize,
}

impl fmt::Display for MalformedPayload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected {} byte payload, got {}", PAYLOAD_LEN, self.len)
    }
}

/// How the two speed bytes of each wheel are interpreted.
///
/// The board firmware this driver was written against only ever delivered a
/// meaningful low byte, and the deployed decoder keeps just that byte.
/// `LowByte` reproduces that behavior and stays the default; `BigEndian16`
/// combines both bytes into a signed 16-bit value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedLayout {
    #[default]
    LowByte,
    BigEndian16,
}

impl SpeedLayout {
    fn speed(
        self,
        hi: u8,
        lo: u8,
    ) -> i32 {
        match self {
            // High byte is read but intentionally not folded in.
            SpeedLayout::LowByte => i32::from(lo),
            SpeedLayout::BigEndian16 => i32::from(i16::from_be_bytes([hi, lo])),
        }
    }
}

/// Decode a raw frame into `(left, right)` samples using the default layout.
pub fn decode(raw: &[u8]) -> Result<(WheelSample, WheelSample), MalformedPayload> {
    decode_with(raw, SpeedLayout::LowByte)
}

/// Decode a raw frame into `(left, right)` samples with an explicit speed layout.
pub fn decode_with(
    raw: &[u8],
    layout: SpeedLayout,
) -> Result<(WheelSample, WheelSample), MalformedPayload> {
    let frame: &[u8; PAYLOAD_LEN] = raw
        .try_into()
        .map_err(|_| MalformedPayload { len: raw.len() })?;

    let left = wheel(&frame[0..6], layout);
    let right = wheel(&frame[6..12], layout);
    Ok((left, right))
}

/// One wheel occupies six bytes: a 32-bit position then two speed bytes.
fn wheel(
    chunk: &[u8],
    layout: SpeedLayout,
) -> WheelSample {
    let position = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    WheelSample {
        encoder_position: position,
        speed: layout.speed(chunk[4], chunk[5]),
        ..WheelSample::default()
    }
}
