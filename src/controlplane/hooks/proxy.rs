//! Observed proxy hook
//!
//! Propagates the cluster-wide egress proxy to every container of a workload.

use super::{all_containers_mut, upsert_env, WorkloadTemplate};
use crate::error::Result;

/// Cluster proxy settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// Environment variables to inject, skipping unset or blank values
    pub fn env_vars(&self) -> Vec<(&'static str, &str)> {
        [
            ("HTTP_PROXY", self.http_proxy.as_deref()),
            ("HTTPS_PROXY", self.https_proxy.as_deref()),
            ("NO_PROXY", self.no_proxy.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| match value {
            Some(v) if !v.trim().is_empty() => Some((name, v)),
            _ => None,
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.env_vars().is_empty()
    }
}

pub fn inject_proxy(template: &mut WorkloadTemplate, proxy: &ProxyConfig) -> Result<()> {
    let vars = proxy.env_vars();
    if vars.is_empty() {
        return Ok(());
    }

    let spec = template.pod_spec_mut()?;
    for container in all_containers_mut(spec) {
        for (name, value) in &vars {
            upsert_env(container, name, value);
        }
    }
    Ok(())
}
