//! Math utilities for the wheel encoder stack.
//!
//! This module decodes encoder board payloads and converts encoder pulses into
//! distances.

pub mod codec;
pub mod distance;
