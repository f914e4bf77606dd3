//! Utility re-exports and helper macros for the wheel encoder stack.
//!
//! - `connection`: wheel sample topics and the telemetry relay
//! - `controllers`: the I2C encoder driver and its scheduling controller
//! - `math`: payload decoding and pulse-to-distance conversion
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod connection;
pub mod controllers;
pub mod math;

pub use connection::relay::{TelemetryRelay, WheelDistance};
pub use connection::topics::{WheelSample, WHEEL_TOPICS};
pub use controllers::{EncoderController, EncoderDriver, DRIVER_CHANNEL};
pub use embassy_time::*;

#[doc(hidden)]
pub use static_cell as __static_cell;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::utils::__static_cell::StaticCell<$t> =
            $crate::utils::__static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
