//! Secret hash annotation hook
//!
//! Stamps a digest of the credentials secret onto the workload and its pod
//! template so that rotating the secret rolls the pods.

use super::WorkloadTemplate;
use crate::domain::ports::SecretLister;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};

/// Annotation prefix for dependency hashes
pub const DEPENDENCY_ANNOTATION_PREFIX: &str = "operator.openshift.io/";

/// Maximum length of the name segment of an annotation key
const MAX_ANNOTATION_NAME_LEN: usize = 63;

/// Identifies a secret whose content drives a rollout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretReference {
    pub namespace: String,
    pub name: String,
}

impl SecretReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Annotation key under which the hash is stored
    pub fn annotation_key(&self) -> String {
        let name = format!("dep-{}.{}.secret", self.namespace, self.name);
        let name = if name.len() > MAX_ANNOTATION_NAME_LEN {
            let digest = hex::encode(Sha256::digest(name.as_bytes()));
            let mut hashed = format!("dep-{}", digest);
            hashed.truncate(MAX_ANNOTATION_NAME_LEN);
            hashed
        } else {
            name
        };
        format!("{}{}", DEPENDENCY_ANNOTATION_PREFIX, name)
    }
}

/// SHA-256 over the secret payload, hex encoded
pub fn secret_hash(secret: &Secret) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&secret.data)?);
    hasher.update(serde_json::to_vec(&secret.string_data)?);
    Ok(hex::encode(hasher.finalize()))
}

pub fn annotate_secret_hash(
    template: &mut WorkloadTemplate,
    reference: &SecretReference,
    secrets: &dyn SecretLister,
) -> Result<()> {
    let secret = secrets
        .get_secret(&reference.namespace, &reference.name)
        .ok_or_else(|| Error::SecretNotFound {
            namespace: reference.namespace.clone(),
            name: reference.name.clone(),
        })?;

    let hash = secret_hash(&secret)?;
    let key = reference.annotation_key();

    annotate(template.metadata_mut(), &key, &hash);
    let pod_template = template.pod_template_mut()?;
    annotate(
        pod_template.metadata.get_or_insert_with(ObjectMeta::default),
        &key,
        &hash,
    );
    Ok(())
}

fn annotate(metadata: &mut ObjectMeta, key: &str, value: &str) {
    metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::hooks::fixtures::{controller, node};
    use crate::domain::testing::{secret, StaticSecrets};
    use assert_matches::assert_matches;

    const NS: &str = "openshift-cluster-csi-drivers";
    const NAME: &str = "azure-disk-credentials";

    fn reference() -> SecretReference {
        SecretReference::new(NS, NAME)
    }

    fn pod_annotation(template: &WorkloadTemplate) -> Option<String> {
        template
            .pod_template()?
            .metadata
            .as_ref()?
            .annotations
            .as_ref()?
            .get(&reference().annotation_key())
            .cloned()
    }

    #[test]
    fn test_hash_deterministic() {
        let a = secret(NS, NAME, &[("azure_client_id", b"abc"), ("azure_client_secret", b"xyz")]);
        let b = secret(NS, NAME, &[("azure_client_secret", b"xyz"), ("azure_client_id", b"abc")]);
        assert_eq!(secret_hash(&a).unwrap(), secret_hash(&a).unwrap());
        assert_eq!(secret_hash(&a).unwrap(), secret_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_changes_with_one_byte() {
        let a = secret(NS, NAME, &[("azure_client_secret", b"xyz")]);
        let b = secret(NS, NAME, &[("azure_client_secret", b"xyy")]);
        assert_ne!(secret_hash(&a).unwrap(), secret_hash(&b).unwrap());
    }

    #[test]
    fn test_annotates_workload_and_pod_template() {
        let secrets = StaticSecrets::new(vec![secret(NS, NAME, &[("azure_client_id", b"abc")])]);
        let mut template = node();
        annotate_secret_hash(&mut template, &reference(), &secrets).unwrap();

        let expected = secret_hash(&secrets.get_secret(NS, NAME).unwrap()).unwrap();
        assert_eq!(pod_annotation(&template), Some(expected.clone()));
        assert_eq!(
            template
                .metadata()
                .annotations
                .as_ref()
                .unwrap()
                .get(&reference().annotation_key()),
            Some(&expected)
        );
    }

    #[test]
    fn test_rotation_changes_annotation() {
        let secrets = StaticSecrets::new(vec![secret(NS, NAME, &[("azure_client_secret", b"one")])]);
        let mut template = controller();
        annotate_secret_hash(&mut template, &reference(), &secrets).unwrap();
        let before = pod_annotation(&template);

        secrets.set(vec![secret(NS, NAME, &[("azure_client_secret", b"two")])]);
        annotate_secret_hash(&mut template, &reference(), &secrets).unwrap();
        assert_ne!(pod_annotation(&template), before);
    }

    #[test]
    fn test_missing_secret_is_retryable() {
        let mut template = controller();
        let result = annotate_secret_hash(&mut template, &reference(), &StaticSecrets::default());
        let err = result.unwrap_err();
        assert_matches!(err, Error::SecretNotFound { .. });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_annotation_key_length() {
        assert_eq!(
            reference().annotation_key(),
            "operator.openshift.io/dep-openshift-cluster-csi-drivers.azure-disk-credentials.secret"
        );

        let long = SecretReference::new("a".repeat(40), "b".repeat(40));
        let key = long.annotation_key();
        let name = key.strip_prefix(DEPENDENCY_ANNOTATION_PREFIX).unwrap();
        assert_eq!(name.len(), MAX_ANNOTATION_NAME_LEN);
        assert!(name.starts_with("dep-"));
    }
}
