//! Azure Disk Operator - Platform-Adaptive CSI Driver Lifecycle
//!
//! A Kubernetes operator that deploys the Azure Disk CSI driver and adapts it
//! to the platform the cluster runs on: public Azure, or Azure Stack Hub with
//! its custom endpoints and storage SKUs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                             Orchestrator                                     │
//! │         detect platform ─▶ select assets ─▶ build pipelines ─▶ start         │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌──────────────────────────┐  ┌────────────────────┐  │
//! │  │    Platform     │  │  Hook Pipelines          │  │  Config            │  │
//! │  │    Detector     │  │  image ▶ proxy ▶ replicas│  │  Synchronizer      │  │
//! │  │ (Infrastructure)│  │  ▶ platform ▶ secret hash│  │  (Stack Hub only)  │  │
//! │  └─────────────────┘  └────────────┬─────────────┘  └─────────┬──────────┘  │
//! │                                    │                          │             │
//! │                       ┌────────────┴────────────┐             │             │
//! │                       │  Apply Engine (SSA)     │◀── caches ──┘             │
//! │                       └─────────────────────────┘                           │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                        Cluster Adapters (kube-rs)                            │
//! │   Infrastructure reader · ConfigMap store · Node / Secret reflectors        │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Detection, assets, hooks, synchronizer, engine and orchestrator
//! - [`cluster`]: Kubernetes-backed port implementations
//! - [`crd`]: Resource types read by the operator
//! - [`domain`]: Platform variant and port traits
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod cluster;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use controlplane::{
    detect_platform, run_operator, select_assets, ApplyEngine, AssetSet, Collaborators,
    ConfigSynchronizer, DirectoryAssets, EmbeddedAssets, EngineConfig, Hook, HookContext,
    ImageReference, Operator, OperatorConfig, Pipeline, PipelineSettings, PlatformFields,
    ProxyConfig, ReconciliationEngine, RunningOperator, SecretReference, SyncConfig, SyncOutcome,
    SyncState, WorkloadKind, WorkloadTemplate,
};

pub use crd::{Infrastructure, InfrastructureSpec, InfrastructureStatus};

pub use domain::ports::{
    AssetReader, ConfigMapStore, InfrastructureReader, NodeLister, PlatformVariant, SecretLister,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::OperatorMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
