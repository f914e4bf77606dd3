//! Module Exports
//!
//! This file exports the modules that move wheel samples from the drivers to
//! the outbound telemetry link.
//!
//! # Modules
//! - `topics`: per-wheel latest-value topics shared by drivers and the relay.
//! - `relay`: merges wheel topics into wheel-distance messages.

pub mod relay;
/// Module for the per-wheel sample topics.
pub mod topics;
