//! Wheel encoder driver and wheel-distance telemetry relay for no-std embedded
//! platforms.
//!
//! For a runnable host simulation, see the `encoder-app/mock-mcu` binary.
#![no_std]

pub mod utils;
