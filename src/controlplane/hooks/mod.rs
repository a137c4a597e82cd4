//! Template Mutation Pipeline
//!
//! Workload templates (the controller Deployment and the node DaemonSet) are
//! parsed from their assets and then run through an ordered list of hooks
//! before being handed to the apply engine. The hook set is closed, so it is
//! modelled as an enum rather than a registry of callbacks.
//!
//! Every hook is idempotent: the pipeline starts from the base template on
//! each reconciliation tick, and applying it to an already rendered template
//! yields the same result.

pub mod image;
pub mod platform_fields;
pub mod proxy;
pub mod replicas;
pub mod secret_hash;

pub use image::*;
pub use platform_fields::*;
pub use proxy::*;
pub use replicas::*;
pub use secret_hash::*;

use crate::domain::ports::{NodeLister, PlatformVariant, SecretLister};
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::trace;

// =============================================================================
// Workload Template
// =============================================================================

/// Which workload a template describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// Controller Deployment
    Controller,
    /// Per-node DaemonSet
    Node,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Controller => write!(f, "controller"),
            WorkloadKind::Node => write!(f, "node"),
        }
    }
}

/// In-memory workload prior to being applied
#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadTemplate {
    Controller(Deployment),
    Node(DaemonSet),
}

impl WorkloadTemplate {
    /// Parse a workload asset
    pub fn parse(kind: WorkloadKind, asset: &str, bytes: &[u8]) -> Result<Self> {
        let invalid = |e: serde_yaml::Error| Error::InvalidTemplate {
            name: asset.to_string(),
            reason: e.to_string(),
        };
        let template = match kind {
            WorkloadKind::Controller => {
                WorkloadTemplate::Controller(serde_yaml::from_slice(bytes).map_err(invalid)?)
            }
            WorkloadKind::Node => {
                WorkloadTemplate::Node(serde_yaml::from_slice(bytes).map_err(invalid)?)
            }
        };

        if template.pod_template().is_none() {
            return Err(Error::InvalidTemplate {
                name: asset.to_string(),
                reason: "missing spec.template".into(),
            });
        }
        Ok(template)
    }

    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadTemplate::Controller(_) => WorkloadKind::Controller,
            WorkloadTemplate::Node(_) => WorkloadKind::Node,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            WorkloadTemplate::Controller(d) => &d.metadata,
            WorkloadTemplate::Node(ds) => &ds.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            WorkloadTemplate::Controller(d) => &mut d.metadata,
            WorkloadTemplate::Node(ds) => &mut ds.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn pod_template(&self) -> Option<&PodTemplateSpec> {
        match self {
            WorkloadTemplate::Controller(d) => d.spec.as_ref().map(|s| &s.template),
            WorkloadTemplate::Node(ds) => ds.spec.as_ref().map(|s| &s.template),
        }
    }

    pub fn pod_template_mut(&mut self) -> Result<&mut PodTemplateSpec> {
        let name = self.name().to_string();
        let template = match self {
            WorkloadTemplate::Controller(d) => d.spec.as_mut().map(|s| &mut s.template),
            WorkloadTemplate::Node(ds) => ds.spec.as_mut().map(|s| &mut s.template),
        };
        template.ok_or_else(|| Error::InvalidTemplate {
            name,
            reason: "missing spec.template".into(),
        })
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        self.pod_template()?.spec.as_ref()
    }

    pub fn pod_spec_mut(&mut self) -> Result<&mut PodSpec> {
        Ok(self.pod_template_mut()?.spec.get_or_insert_with(PodSpec::default))
    }

    /// Run `f` over the JSON representation of the workload
    pub(crate) fn map_json(&mut self, f: impl FnOnce(&mut serde_json::Value)) -> Result<()> {
        match self {
            WorkloadTemplate::Controller(d) => {
                let mut value = serde_json::to_value(&*d)?;
                f(&mut value);
                *d = serde_json::from_value(value)?;
            }
            WorkloadTemplate::Node(ds) => {
                let mut value = serde_json::to_value(&*ds)?;
                f(&mut value);
                *ds = serde_json::from_value(value)?;
            }
        }
        Ok(())
    }

    /// Serialized form, stable across runs
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            WorkloadTemplate::Controller(d) => serde_json::to_vec(d)?,
            WorkloadTemplate::Node(ds) => serde_json::to_vec(ds)?,
        };
        Ok(bytes)
    }
}

// =============================================================================
// Hook Context
// =============================================================================

/// Read-only inputs available to hooks during one render
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    pub variant: PlatformVariant,
    pub nodes: &'a dyn NodeLister,
    pub secrets: &'a dyn SecretLister,
}

// =============================================================================
// Hooks
// =============================================================================

/// A named transformation applied to a workload template
#[derive(Debug, Clone, PartialEq)]
pub enum Hook {
    /// Replace an image placeholder with a configured image reference
    ImageSubstitution(ImageReference),
    /// Inject the cluster proxy environment
    ObservedProxy(ProxyConfig),
    /// Size the controller from the number of eligible nodes
    Replicas,
    /// Mount the synchronized endpoint config (restricted platform only)
    PlatformFields(PlatformFields),
    /// Stamp a hash of a secret so credential rotation rolls the pods
    SecretHashAnnotation(SecretReference),
}

impl Hook {
    pub fn name(&self) -> &'static str {
        match self {
            Hook::ImageSubstitution(_) => "image-substitution",
            Hook::ObservedProxy(_) => "observed-proxy",
            Hook::Replicas => "replicas",
            Hook::PlatformFields(_) => "platform-fields",
            Hook::SecretHashAnnotation(_) => "secret-hash-annotation",
        }
    }

    /// Apply the hook in place
    pub fn apply(&self, template: &mut WorkloadTemplate, ctx: &HookContext<'_>) -> Result<()> {
        match self {
            Hook::ImageSubstitution(image) => substitute_image(template, image),
            Hook::ObservedProxy(proxy) => inject_proxy(template, proxy),
            Hook::Replicas => set_replicas(template, ctx.nodes),
            Hook::PlatformFields(fields) => {
                if ctx.variant.is_restricted() {
                    inject_platform_fields(template, fields)
                } else {
                    Ok(())
                }
            }
            Hook::SecretHashAnnotation(secret) => annotate_secret_hash(template, secret, ctx.secrets),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Ordered hook chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    hooks: Vec<Hook>,
}

impl Pipeline {
    pub fn new(hooks: Vec<Hook>) -> Self {
        Self { hooks }
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }

    /// Render the final template from a base template
    pub fn render(&self, base: &WorkloadTemplate, ctx: &HookContext<'_>) -> Result<WorkloadTemplate> {
        let mut template = base.clone();
        for hook in &self.hooks {
            hook.apply(&mut template, ctx)?;
            trace!(hook = hook.name(), workload = %template.kind(), "Applied hook");
        }
        Ok(template)
    }
}

/// Inputs for building the controller and node pipelines
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub images: Vec<ImageReference>,
    pub proxy: ProxyConfig,
    pub platform_fields: PlatformFields,
    pub secret: SecretReference,
}

impl PipelineSettings {
    fn prefix(&self) -> Vec<Hook> {
        let mut hooks: Vec<Hook> = self.images.iter().cloned().map(Hook::ImageSubstitution).collect();
        hooks.push(Hook::ObservedProxy(self.proxy.clone()));
        hooks
    }

    /// Controller Deployment: images, proxy, replicas, platform fields, secret hash
    pub fn controller_pipeline(&self, variant: PlatformVariant) -> Pipeline {
        let mut hooks = self.prefix();
        hooks.push(Hook::Replicas);
        if variant.is_restricted() {
            hooks.push(Hook::PlatformFields(self.platform_fields.clone()));
        }
        hooks.push(Hook::SecretHashAnnotation(self.secret.clone()));
        Pipeline::new(hooks)
    }

    /// Node DaemonSet: images, proxy, platform fields, secret hash
    pub fn node_pipeline(&self, variant: PlatformVariant) -> Pipeline {
        let mut hooks = self.prefix();
        if variant.is_restricted() {
            hooks.push(Hook::PlatformFields(self.platform_fields.clone()));
        }
        hooks.push(Hook::SecretHashAnnotation(self.secret.clone()));
        Pipeline::new(hooks)
    }
}

// =============================================================================
// Container Helpers
// =============================================================================

/// Main and init containers of a pod
pub(crate) fn all_containers_mut(spec: &mut PodSpec) -> impl Iterator<Item = &mut Container> {
    spec.containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut().flatten())
}

pub(crate) fn upsert_env(container: &mut Container, name: &str, value: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    let var = EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    };
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => *existing = var,
        None => env.push(var),
    }
}

pub(crate) fn upsert_volume_mount(container: &mut Container, mount: VolumeMount) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    match mounts.iter_mut().find(|m| m.name == mount.name) {
        Some(existing) => *existing = mount,
        None => mounts.push(mount),
    }
}

pub(crate) fn upsert_volume(spec: &mut PodSpec, volume: Volume) {
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    match volumes.iter_mut().find(|v| v.name == volume.name) {
        Some(existing) => *existing = volume,
        None => volumes.push(volume),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::domain::testing::{master_nodes, secret, StaticNodes, StaticSecrets};
    use assert_matches::assert_matches;

    fn stores() -> (StaticNodes, StaticSecrets) {
        (
            StaticNodes::new(master_nodes(3)),
            StaticSecrets::new(vec![secret(
                "openshift-cluster-csi-drivers",
                "azure-disk-credentials",
                &[("azure_client_id", b"abc"), ("azure_client_secret", b"s3cr3t")],
            )]),
        )
    }

    #[test]
    fn test_parse_workloads() {
        assert_eq!(controller().kind(), WorkloadKind::Controller);
        assert_eq!(controller().name(), "azure-disk-csi-driver-controller");
        assert_eq!(node().kind(), WorkloadKind::Node);
        assert!(node().pod_spec().is_some());
    }

    #[test]
    fn test_parse_rejects_missing_template() {
        let result = WorkloadTemplate::parse(
            WorkloadKind::Controller,
            "broken.yaml",
            b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: x\n",
        );
        assert_matches!(result, Err(Error::InvalidTemplate { .. }));
    }

    #[test]
    fn test_pipeline_order() {
        let pipeline = settings().controller_pipeline(PlatformVariant::Restricted);
        let names: Vec<_> = pipeline.hooks().iter().map(Hook::name).collect();
        let tail = &names[names.len() - 4..];
        assert_eq!(
            tail,
            ["observed-proxy", "replicas", "platform-fields", "secret-hash-annotation"]
        );
        assert!(names[..names.len() - 4].iter().all(|n| *n == "image-substitution"));

        let standard = settings().node_pipeline(PlatformVariant::Standard);
        assert!(!standard.hooks().iter().any(|h| matches!(h, Hook::PlatformFields(_))));
        assert!(!standard.hooks().iter().any(|h| matches!(h, Hook::Replicas)));
    }

    #[test]
    fn test_pipeline_idempotent() {
        let (nodes, secrets) = stores();
        for variant in PlatformVariant::ALL {
            let ctx = HookContext { variant, nodes: &nodes, secrets: &secrets };
            let settings = settings();

            for (pipeline, base) in [
                (settings.controller_pipeline(variant), controller()),
                (settings.node_pipeline(variant), node()),
            ] {
                let once = pipeline.render(&base, &ctx).unwrap();
                let twice = pipeline.render(&once, &ctx).unwrap();
                assert_eq!(once.to_json().unwrap(), twice.to_json().unwrap());

                let again = pipeline.render(&base, &ctx).unwrap();
                assert_eq!(once.to_json().unwrap(), again.to_json().unwrap());
            }
        }
    }

    #[test]
    fn test_pipeline_renders_no_placeholders() {
        let (nodes, secrets) = stores();
        let ctx = HookContext {
            variant: PlatformVariant::Standard,
            nodes: &nodes,
            secrets: &secrets,
        };
        let rendered = settings()
            .controller_pipeline(PlatformVariant::Standard)
            .render(&controller(), &ctx)
            .unwrap();
        let json = String::from_utf8(rendered.to_json().unwrap()).unwrap();
        assert!(!json.contains("${"));
    }

    #[test]
    fn test_pipeline_stops_on_error() {
        let (nodes, _) = stores();
        let secrets = StaticSecrets::default();
        let ctx = HookContext {
            variant: PlatformVariant::Standard,
            nodes: &nodes,
            secrets: &secrets,
        };
        let result = settings()
            .node_pipeline(PlatformVariant::Standard)
            .render(&node(), &ctx);
        assert_matches!(result, Err(Error::SecretNotFound { .. }));
    }

    #[test]
    fn test_unset_image_only_blocks_its_workload() {
        let (nodes, secrets) = stores();
        let ctx = HookContext {
            variant: PlatformVariant::Standard,
            nodes: &nodes,
            secrets: &secrets,
        };
        let mut settings = settings();
        for image in settings.images.iter_mut() {
            if image.placeholder == "${PROVISIONER_IMAGE}" {
                image.image = String::new();
            }
        }

        let node = settings
            .node_pipeline(PlatformVariant::Standard)
            .render(&node(), &ctx)
            .unwrap();
        let json = String::from_utf8(node.to_json().unwrap()).unwrap();
        assert!(!json.contains("${"));

        let result = settings
            .controller_pipeline(PlatformVariant::Standard)
            .render(&controller(), &ctx);
        assert_matches!(
            result,
            Err(Error::MissingImageReference { placeholder }) if placeholder == "${PROVISIONER_IMAGE}"
        );
    }

    #[test]
    fn test_upsert_env_replaces() {
        let mut container = Container::default();
        upsert_env(&mut container, "A", "1");
        upsert_env(&mut container, "A", "2");
        let env = container.env.unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].value.as_deref(), Some("2"));
    }
}
