//! Kubernetes client wrapper

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tracing::{info, instrument};

use super::readiness::PodObservation;
use crate::error::ClusterError;

/// Source of cluster-wide pod snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodLister: Send + Sync {
    /// List every pod in every namespace
    async fn list_pods(&self) -> Result<PodObservation, ClusterError>;
}

/// Wrapper around kube::Client used by the readiness waiter
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a client from the kubeconfig at `path`
    #[instrument]
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, ClusterError> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|source| ClusterError::Kubeconfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|source| ClusterError::Kubeconfig {
                path: path.to_path_buf(),
                source,
            })?;
        let client = Client::try_from(config)?;

        info!(kubeconfig = %path.display(), "Created Kubernetes client");
        Ok(Self { client })
    }

    /// Create a client from the environment (in-cluster or default kubeconfig)
    #[instrument]
    pub async fn infer() -> Result<Self, ClusterError> {
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;

        info!("Created Kubernetes client from inferred configuration");
        Ok(Self { client })
    }

    /// Build from an explicit kubeconfig when one is configured, otherwise infer
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ClusterError> {
        match kubeconfig {
            Some(path) => Self::from_kubeconfig(path).await,
            None => Self::infer().await,
        }
    }
}

#[async_trait]
impl PodLister for K8sClient {
    async fn list_pods(&self) -> Result<PodObservation, ClusterError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods.list(&ListParams::default()).await?;
        Ok(PodObservation::from_pods(list.items))
    }
}
