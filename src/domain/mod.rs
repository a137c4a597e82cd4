//! Domain layer - Core types and port definitions
//!
//! This module defines the platform variant and the traits (ports) through
//! which the adaptive logic reaches the cluster, following hexagonal
//! architecture principles.

pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use ports::*;
