//! Backend construction from connection parameters.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::config::{BackendKind, CoordinatorConfig};
use crate::discovery::{DiscoveryError, MemoryRegistry, Registry, Result};

/// Builds a live backend from `(kind, connection parameters)`.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(
        &self,
        kind: BackendKind,
        params: &CoordinatorConfig,
    ) -> Result<Arc<dyn Registry>>;
}

/// Connector for in-process clusters.
///
/// A cluster is identified by its endpoint set, so two connections to the
/// same endpoints (in any order) observe the same membership.
#[derive(Default)]
pub struct MemoryConnector {
    clusters: DashMap<String, Arc<MemoryRegistry>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cluster reached through `params`, created on first use.
    pub fn cluster(&self, params: &CoordinatorConfig) -> Arc<MemoryRegistry> {
        let key = cluster_key(&params.endpoints);
        self.clusters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(MemoryRegistry::with_label(format!("memory[{}]", key))))
            .clone()
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(
        &self,
        kind: BackendKind,
        params: &CoordinatorConfig,
    ) -> Result<Arc<dyn Registry>> {
        match kind {
            BackendKind::Memory => {
                let cluster = self.cluster(params);
                tracing::debug!(endpoints = ?params.endpoints, "Connected to memory cluster");
                Ok(cluster as Arc<dyn Registry>)
            }
            other => Err(DiscoveryError::Configuration(format!(
                "no support discovery type({})",
                other
            ))),
        }
    }
}

fn cluster_key(endpoints: &[String]) -> String {
    let mut sorted: Vec<&str> = endpoints.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}
