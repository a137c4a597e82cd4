//! Platform detection
//!
//! Determines which infrastructure variant the cluster runs on. The result is
//! computed once and handed to the asset selector, the hook pipelines and the
//! orchestrator.

pub mod detector;

pub use detector::*;
