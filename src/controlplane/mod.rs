//! Control Plane Module
//!
//! Platform detection, asset selection, workload rendering, config
//! synchronization and the apply engine, tied together by the orchestrator.

pub mod assets;
pub mod engine;
pub mod hooks;
pub mod orchestrator;
pub mod platform;
pub mod sync;

pub use assets::*;
pub use engine::*;
pub use hooks::*;
pub use orchestrator::*;
pub use platform::*;
pub use sync::*;
