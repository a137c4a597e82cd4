use crate::crd::{Infrastructure, INFRASTRUCTURE_NAME};
use crate::domain::ports::InfrastructureReader;
use crate::error::Result;
use async_trait::async_trait;
use kube::{Api, Client};

/// Reads the cluster-scoped `Infrastructure` singleton
pub struct KubeInfrastructureReader {
    api: Api<Infrastructure>,
}

impl KubeInfrastructureReader {
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl InfrastructureReader for KubeInfrastructureReader {
    async fn get_infrastructure(&self) -> Result<Infrastructure> {
        Ok(self.api.get(INFRASTRUCTURE_NAME).await?)
    }
}
