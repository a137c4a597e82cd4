//! Image substitution hook
//!
//! Templates reference images through `${NAME}` placeholders which are
//! replaced with image references from the operator's environment.

use super::WorkloadTemplate;
use crate::error::{Error, Result};
use serde_json::Value;

/// Placeholders used by the workload templates and the environment variables
/// that supply their values
pub const IMAGE_PLACEHOLDERS: &[(&str, &str)] = &[
    ("${DRIVER_IMAGE}", "DRIVER_IMAGE"),
    ("${PROVISIONER_IMAGE}", "PROVISIONER_IMAGE"),
    ("${ATTACHER_IMAGE}", "ATTACHER_IMAGE"),
    ("${RESIZER_IMAGE}", "RESIZER_IMAGE"),
    ("${SNAPSHOTTER_IMAGE}", "SNAPSHOTTER_IMAGE"),
    ("${NODE_DRIVER_REGISTRAR_IMAGE}", "NODE_DRIVER_REGISTRAR_IMAGE"),
    ("${LIVENESS_PROBE_IMAGE}", "LIVENESS_PROBE_IMAGE"),
    (
        "${CLUSTER_CLOUD_CONTROLLER_MANAGER_OPERATOR_IMAGE}",
        "CLUSTER_CLOUD_CONTROLLER_MANAGER_OPERATOR_IMAGE",
    ),
];

/// A placeholder token and the image that replaces it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub placeholder: String,
    pub image: String,
}

impl ImageReference {
    pub fn new(placeholder: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
            image: image.into(),
        }
    }
}

/// Replace every occurrence of the placeholder in any string field.
///
/// An empty image is rejected when the template references the placeholder:
/// deploying it would leave pods with a blank image reference. Templates that
/// never use the placeholder are left alone.
pub fn substitute_image(template: &mut WorkloadTemplate, reference: &ImageReference) -> Result<()> {
    let blank = reference.image.trim().is_empty();
    let mut referenced = false;

    template.map_json(|value| {
        referenced = contains_placeholder(value, &reference.placeholder);
        if referenced && !blank {
            replace_strings(value, &reference.placeholder, &reference.image);
        }
    })?;

    if referenced && blank {
        return Err(Error::MissingImageReference {
            placeholder: reference.placeholder.clone(),
        });
    }
    Ok(())
}

fn contains_placeholder(value: &Value, placeholder: &str) -> bool {
    match value {
        Value::String(s) => s.contains(placeholder),
        Value::Array(items) => items.iter().any(|item| contains_placeholder(item, placeholder)),
        Value::Object(map) => map.values().any(|item| contains_placeholder(item, placeholder)),
        _ => false,
    }
}

fn replace_strings(value: &mut Value, placeholder: &str, image: &str) {
    match value {
        Value::String(s) if s.contains(placeholder) => *s = s.replace(placeholder, image),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| replace_strings(item, placeholder, image)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|item| replace_strings(item, placeholder, image)),
        _ => {}
    }
}
