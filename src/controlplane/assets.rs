//! Asset Selection and Loading
//!
//! Maps a platform variant to the ordered list of static templates the
//! operator applies, and provides the readers that return template bytes
//! by logical name.
//!
//! Variant-dependent assets are declared in [`VARIANT_ASSETS`]; supporting a
//! new variant means adding one row there.

use crate::domain::ports::{AssetReader, PlatformVariant};
use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing::debug;

// =============================================================================
// Selection Table
// =============================================================================

/// Variant-specific template names
#[derive(Debug, Clone, Copy)]
pub struct VariantAssets {
    pub variant: PlatformVariant,
    pub storage_class: &'static str,
    pub snapshot_class: &'static str,
    /// Additional variant-only resources
    pub extra: &'static [&'static str],
}

/// One row per platform variant
pub const VARIANT_ASSETS: &[VariantAssets] = &[
    VariantAssets {
        variant: PlatformVariant::Standard,
        storage_class: "storageclass.yaml",
        snapshot_class: "volumesnapshotclass.yaml",
        extra: &[],
    },
    VariantAssets {
        variant: PlatformVariant::Restricted,
        storage_class: "storageclass_restricted.yaml",
        snapshot_class: "volumesnapshotclass_restricted.yaml",
        extra: &[],
    },
];

/// Templates applied on every variant, in apply order
pub const COMMON_ASSETS: &[&str] = &[
    "controller_sa.yaml",
    "controller_pdb.yaml",
    "node_sa.yaml",
    "csidriver.yaml",
    "service.yaml",
    "rbac/attacher_role.yaml",
    "rbac/attacher_binding.yaml",
    "rbac/privileged_role.yaml",
    "rbac/controller_privileged_binding.yaml",
    "rbac/node_privileged_binding.yaml",
    "rbac/provisioner_role.yaml",
    "rbac/provisioner_binding.yaml",
    "rbac/resizer_role.yaml",
    "rbac/resizer_binding.yaml",
    "rbac/snapshotter_role.yaml",
    "rbac/snapshotter_binding.yaml",
];

/// Controller Deployment template
pub const CONTROLLER_ASSET: &str = "controller.yaml";

/// Node DaemonSet template
pub const NODE_ASSET: &str = "node.yaml";

// =============================================================================
// Asset Set
// =============================================================================

/// Ordered list of static template names for one variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSet {
    pub variant: PlatformVariant,
    pub storage_class: &'static str,
    pub snapshot_class: &'static str,
    names: Vec<&'static str>,
}

impl AssetSet {
    /// All template names in apply order
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| *n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Row of [`VARIANT_ASSETS`] for a variant
pub fn variant_assets(variant: PlatformVariant) -> &'static VariantAssets {
    VARIANT_ASSETS
        .iter()
        .find(|row| row.variant == variant)
        .unwrap_or(&VARIANT_ASSETS[0])
}

/// Resolve the static template set for a platform variant
pub fn select_assets(variant: PlatformVariant) -> AssetSet {
    let row = variant_assets(variant);

    let mut names = Vec::with_capacity(2 + row.extra.len() + COMMON_ASSETS.len());
    names.push(row.snapshot_class);
    names.push(row.storage_class);
    names.extend_from_slice(row.extra);
    names.extend_from_slice(COMMON_ASSETS);

    debug!("Selected {} assets for {} platform", names.len(), variant);

    AssetSet {
        variant,
        storage_class: row.storage_class,
        snapshot_class: row.snapshot_class,
        names,
    }
}

// =============================================================================
// Embedded Assets
// =============================================================================

/// All embedded templates as (name, content) pairs
pub const EMBEDDED_ASSETS: &[(&str, &str)] = &[
    ("storageclass.yaml", include_str!("../../assets/storageclass.yaml")),
    ("storageclass_restricted.yaml", include_str!("../../assets/storageclass_restricted.yaml")),
    ("volumesnapshotclass.yaml", include_str!("../../assets/volumesnapshotclass.yaml")),
    (
        "volumesnapshotclass_restricted.yaml",
        include_str!("../../assets/volumesnapshotclass_restricted.yaml"),
    ),
    ("controller_sa.yaml", include_str!("../../assets/controller_sa.yaml")),
    ("controller_pdb.yaml", include_str!("../../assets/controller_pdb.yaml")),
    ("node_sa.yaml", include_str!("../../assets/node_sa.yaml")),
    ("csidriver.yaml", include_str!("../../assets/csidriver.yaml")),
    ("service.yaml", include_str!("../../assets/service.yaml")),
    ("rbac/attacher_role.yaml", include_str!("../../assets/rbac/attacher_role.yaml")),
    ("rbac/attacher_binding.yaml", include_str!("../../assets/rbac/attacher_binding.yaml")),
    ("rbac/privileged_role.yaml", include_str!("../../assets/rbac/privileged_role.yaml")),
    (
        "rbac/controller_privileged_binding.yaml",
        include_str!("../../assets/rbac/controller_privileged_binding.yaml"),
    ),
    (
        "rbac/node_privileged_binding.yaml",
        include_str!("../../assets/rbac/node_privileged_binding.yaml"),
    ),
    ("rbac/provisioner_role.yaml", include_str!("../../assets/rbac/provisioner_role.yaml")),
    ("rbac/provisioner_binding.yaml", include_str!("../../assets/rbac/provisioner_binding.yaml")),
    ("rbac/resizer_role.yaml", include_str!("../../assets/rbac/resizer_role.yaml")),
    ("rbac/resizer_binding.yaml", include_str!("../../assets/rbac/resizer_binding.yaml")),
    ("rbac/snapshotter_role.yaml", include_str!("../../assets/rbac/snapshotter_role.yaml")),
    ("rbac/snapshotter_binding.yaml", include_str!("../../assets/rbac/snapshotter_binding.yaml")),
    ("controller.yaml", include_str!("../../assets/controller.yaml")),
    ("node.yaml", include_str!("../../assets/node.yaml")),
];

/// Templates compiled into the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets;

impl AssetReader for EmbeddedAssets {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        EMBEDDED_ASSETS
            .iter()
            .find(|(asset, _)| *asset == name)
            .map(|(_, content)| content.as_bytes().to_vec())
            .ok_or_else(|| Error::AssetNotFound { name: name.to_string() })
    }
}

// =============================================================================
// Directory Assets
// =============================================================================

/// Templates read from a directory, falling back to the embedded copy for
/// files the directory does not provide
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetReader for DirectoryAssets {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!("Loaded asset {} from {}", name, path.display());
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EmbeddedAssets.read(name),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_every_variant_has_one_row() {
        for variant in PlatformVariant::ALL {
            let rows = VARIANT_ASSETS.iter().filter(|r| r.variant == variant).count();
            assert_eq!(rows, 1, "variant {} must have exactly one row", variant);
        }
    }

    #[test]
    fn test_select_assets_per_variant() {
        let standard = select_assets(PlatformVariant::Standard);
        assert_eq!(standard.storage_class, "storageclass.yaml");
        assert_eq!(standard.snapshot_class, "volumesnapshotclass.yaml");
        assert!(!standard.contains("storageclass_restricted.yaml"));

        let restricted = select_assets(PlatformVariant::Restricted);
        assert_eq!(restricted.storage_class, "storageclass_restricted.yaml");
        assert_eq!(restricted.snapshot_class, "volumesnapshotclass_restricted.yaml");
        assert!(!restricted.contains("storageclass.yaml"));
    }

    #[test]
    fn test_select_assets_deterministic() {
        for variant in PlatformVariant::ALL {
            assert_eq!(select_assets(variant), select_assets(variant));
        }
    }

    #[test]
    fn test_exactly_one_class_pair() {
        for variant in PlatformVariant::ALL {
            let set = select_assets(variant);
            let storage = set.names().iter().filter(|n| n.starts_with("storageclass")).count();
            let snapshot = set
                .names()
                .iter()
                .filter(|n| n.starts_with("volumesnapshotclass"))
                .count();
            assert_eq!(storage, 1);
            assert_eq!(snapshot, 1);
        }
    }

    #[test]
    fn test_common_assets_shared() {
        let standard = select_assets(PlatformVariant::Standard);
        let restricted = select_assets(PlatformVariant::Restricted);
        assert_eq!(&standard.names()[2..], &restricted.names()[2..]);
    }

    #[test]
    fn test_selected_assets_are_embedded() {
        for variant in PlatformVariant::ALL {
            for name in select_assets(variant).names() {
                assert!(EmbeddedAssets.read(name).is_ok(), "{} not embedded", name);
            }
        }
        assert!(EmbeddedAssets.read(CONTROLLER_ASSET).is_ok());
        assert!(EmbeddedAssets.read(NODE_ASSET).is_ok());
    }

    #[test]
    fn test_unknown_asset() {
        assert_matches!(
            EmbeddedAssets.read("missing.yaml"),
            Err(Error::AssetNotFound { .. })
        );
    }

    #[test]
    fn test_directory_override_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("csidriver.yaml"), "kind: CSIDriver\n").unwrap();

        let assets = DirectoryAssets::new(dir.path());
        assert_eq!(assets.read("csidriver.yaml").unwrap(), b"kind: CSIDriver\n");
        assert_eq!(
            assets.read("node_sa.yaml").unwrap(),
            EmbeddedAssets.read("node_sa.yaml").unwrap()
        );
    }
}
