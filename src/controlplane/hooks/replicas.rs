//! Replica count hook
//!
//! The controller runs one replica on single-node control planes and two
//! everywhere else. Eligible nodes are schedulable nodes matching the
//! controller's node selector.

use super::WorkloadTemplate;
use crate::domain::ports::NodeLister;
use crate::error::Result;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use tracing::debug;

/// Replica count for a given number of eligible nodes
pub fn replicas_for(eligible_nodes: usize) -> i32 {
    if eligible_nodes < 2 {
        1
    } else {
        2
    }
}

/// Whether a node counts towards replica sizing
pub fn is_eligible(node: &Node, selector: &BTreeMap<String, String>) -> bool {
    let schedulable = !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);

    let labels = node.metadata.labels.as_ref();
    let matches = selector.iter().all(|(key, value)| {
        labels
            .and_then(|l| l.get(key))
            .map(|v| v == value)
            .unwrap_or(false)
    });

    schedulable && matches
}

pub fn set_replicas(template: &mut WorkloadTemplate, nodes: &dyn NodeLister) -> Result<()> {
    let WorkloadTemplate::Controller(deployment) = template else {
        return Ok(());
    };

    let selector = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.node_selector.clone())
        .unwrap_or_default();

    let eligible = nodes
        .list_nodes()
        .iter()
        .filter(|n| is_eligible(n, &selector))
        .count();
    let replicas = replicas_for(eligible);

    debug!(eligible, replicas, "Sizing controller deployment");

    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
    Ok(())
}
