//! In-process registry backend.
//!
//! # Responsibilities
//! - Hold per-service ordered node lists
//! - Publish Created/Updated/Deleted events synchronously, in mutation order
//! - Simulate outages through an availability switch

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::discovery::types::{validate_node, validate_service_name};
use crate::discovery::{
    ChangeEvent, DiscoveryError, EventKind, Node, Registry, Result, Service, UpdateCallback,
    WatchId, Watchers,
};

/// Registry backend kept entirely in memory.
pub struct MemoryRegistry {
    services: RwLock<BTreeMap<String, Vec<Node>>>,
    watchers: Watchers,
    /// Held from mutation through publication so events leave in mutation order.
    mutation: Mutex<()>,
    available: AtomicBool,
    label: String,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::with_label("memory")
    }

    /// Create a registry whose errors and logs carry `label`.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            watchers: Watchers::new(),
            mutation: Mutex::new(()),
            available: AtomicBool::new(true),
            label: label.into(),
        }
    }

    /// Toggle simulated reachability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        tracing::info!(backend = %self.label, available, "Backend availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Replace the whole membership of a service.
    pub fn put_service(&self, service: Service) -> Result<()> {
        self.ensure_available()?;
        validate_service_name(&service.name).map_err(DiscoveryError::Configuration)?;
        let _order = self.mutation.lock();
        let kind = {
            let mut services = self.services.write();
            let kind = if services.contains_key(&service.name) {
                EventKind::Updated
            } else {
                EventKind::Created
            };
            services.insert(service.name.clone(), service.nodes.clone());
            kind
        };
        self.watchers.publish(&ChangeEvent::new(kind, service));
        Ok(())
    }

    /// Drop a service entirely.
    pub fn delete_service(&self, name: &str) -> Result<()> {
        self.ensure_available()?;
        let _order = self.mutation.lock();
        if self.services.write().remove(name).is_none() {
            return Err(DiscoveryError::NotFound(name.to_string()));
        }
        self.watchers
            .publish(&ChangeEvent::new(EventKind::Deleted, Service::empty(name)));
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DiscoveryError::BackendUnavailable(format!(
                "{} backend is unreachable",
                self.label
            )))
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, service: &str, node: &Node) -> Result<()> {
        validate_service_name(service).map_err(DiscoveryError::Configuration)?;
        validate_node(node).map_err(DiscoveryError::Configuration)?;
        self.ensure_available()?;

        let _order = self.mutation.lock();
        let event = {
            let mut services = self.services.write();
            match services.get_mut(service) {
                Some(nodes) if nodes.contains(node) => None,
                Some(nodes) => {
                    nodes.push(node.clone());
                    Some(ChangeEvent::new(
                        EventKind::Updated,
                        Service::new(service, nodes.clone()),
                    ))
                }
                None => {
                    services.insert(service.to_string(), vec![node.clone()]);
                    Some(ChangeEvent::new(
                        EventKind::Created,
                        Service::new(service, vec![node.clone()]),
                    ))
                }
            }
        };

        if let Some(event) = event {
            tracing::debug!(backend = %self.label, service, node = %node, "Node registered");
            self.watchers.publish(&event);
        }
        Ok(())
    }

    async fn unregister(&self, service: &str, node: &Node, graceful: bool) -> Result<()> {
        validate_service_name(service).map_err(DiscoveryError::Configuration)?;
        self.ensure_available()?;

        let _order = self.mutation.lock();
        let event = {
            let mut services = self.services.write();
            let nodes = services
                .get_mut(service)
                .ok_or_else(|| DiscoveryError::NotFound(service.to_string()))?;
            let before = nodes.len();
            nodes.retain(|n| n != node);
            if nodes.len() == before {
                None
            } else if nodes.is_empty() && !graceful {
                services.remove(service);
                Some(ChangeEvent::new(EventKind::Deleted, Service::empty(service)))
            } else {
                Some(ChangeEvent::new(
                    EventKind::Updated,
                    Service::new(service, nodes.clone()),
                ))
            }
        };

        if let Some(event) = event {
            tracing::debug!(
                backend = %self.label,
                service,
                node = %node,
                graceful,
                "Node unregistered"
            );
            self.watchers.publish(&event);
        }
        Ok(())
    }

    async fn discover(&self, service: &str) -> Result<Service> {
        self.ensure_available()?;
        self.services
            .read()
            .get(service)
            .map(|nodes| Service::new(service, nodes.clone()))
            .ok_or_else(|| DiscoveryError::NotFound(service.to_string()))
    }

    async fn load_all(&self) -> Result<Vec<Service>> {
        self.ensure_available()?;
        Ok(self
            .services
            .read()
            .iter()
            .map(|(name, nodes)| Service::new(name.clone(), nodes.clone()))
            .collect())
    }

    fn on_updated(&self, callback: UpdateCallback) -> WatchId {
        self.watchers.subscribe(callback)
    }

    fn remove_watch(&self, id: WatchId) -> bool {
        self.watchers.unsubscribe(id)
    }
}
