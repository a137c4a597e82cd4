//! Kubernetes adapters
//!
//! Implementations of the domain ports backed by a live API server:
//! typed reads of the `Infrastructure` object, ConfigMap writes with
//! optimistic concurrency, and reflector-backed caches for nodes and secrets.

pub mod cache;
pub mod config_maps;
pub mod infrastructure;

pub use cache::*;
pub use config_maps::*;
pub use infrastructure::*;
