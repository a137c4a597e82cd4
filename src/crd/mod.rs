//! Custom Resource Definitions
//!
//! The operator only reads cluster-owned resources:
//! - Infrastructure: cluster platform status, used for platform detection

pub mod infrastructure;

pub use infrastructure::*;
