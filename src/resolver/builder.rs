//! Resolver factory and fan-out registry.
//!
//! # Responsibilities
//! - Build resolvers for dial targets after a synchronous discover
//! - Keep resolvers grouped by service name
//! - Fan every change event out to the resolvers of that service
//!
//! # Design Decisions
//! - One read-write lock: write for insert/remove, read for fan-out
//! - Fan-out never mutates the map it walks
//! - An emptied service entry is removed immediately

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CoordinatorConfig;
use crate::discovery::{within, ChangeEvent, DiscoveryError, Registry, Result, WatchId};
use crate::resolver::conn::ClientConn;
use crate::resolver::resolve::{Resolver, ResolverCore};
use crate::resolver::target::Target;

pub(crate) struct BuilderShared {
    scheme: String,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) op_timeout: Duration,
    resolvers: RwLock<HashMap<String, Vec<Arc<ResolverCore>>>>,
    next_id: AtomicU64,
    watch: Mutex<Option<WatchId>>,
}

impl BuilderShared {
    fn fan_out(&self, event: &ChangeEvent) {
        let resolvers = self.resolvers.read();
        let Some(list) = resolvers.get(&event.service.name) else {
            return;
        };
        tracing::debug!(
            service = %event.service.name,
            kind = event.kind.as_str(),
            resolvers = list.len(),
            "Fanning out change event"
        );
        for resolver in list {
            resolver.update_srv_cfg(&event.service);
        }
    }

    fn insert(&self, core: Arc<ResolverCore>) {
        self.resolvers
            .write()
            .entry(core.service.clone())
            .or_default()
            .push(core);
    }

    pub(crate) fn remove(&self, core: &ResolverCore) {
        let mut resolvers = self.resolvers.write();
        if let Some(list) = resolvers.get_mut(&core.service) {
            list.retain(|r| r.id != core.id);
            if list.is_empty() {
                resolvers.remove(&core.service);
                tracing::debug!(service = %core.service, "Last resolver closed, dropping service entry");
            }
        }
    }
}

impl Drop for BuilderShared {
    fn drop(&mut self) {
        if let Some(id) = self.watch.get_mut().take() {
            self.registry.remove_watch(id);
        }
    }
}

/// Registry and factory of active resolvers, keyed by service name.
#[derive(Clone)]
pub struct Builder {
    shared: Arc<BuilderShared>,
}

impl Builder {
    /// Subscribe to `registry` and warm it with a full load, bounding
    /// registry calls by the default operation timeout.
    pub async fn new(scheme: impl Into<String>, registry: Arc<dyn Registry>) -> Result<Self> {
        Self::with_op_timeout(scheme, registry, CoordinatorConfig::default().op_timeout()).await
    }

    /// Like [`Builder::new`], with every registry call bounded by `op_timeout`.
    pub async fn with_op_timeout(
        scheme: impl Into<String>,
        registry: Arc<dyn Registry>,
        op_timeout: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(BuilderShared {
            scheme: scheme.into(),
            registry: registry.clone(),
            op_timeout,
            resolvers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            watch: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let id = registry.on_updated(Arc::new(move |event: &ChangeEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.fan_out(event);
            }
        }));
        *shared.watch.lock() = Some(id);

        let services = within(op_timeout, registry.load_all()).await?;
        tracing::info!(
            scheme = %shared.scheme,
            services = services.len(),
            "Resolver builder ready"
        );

        Ok(Self { shared })
    }

    pub fn scheme(&self) -> &str {
        &self.shared.scheme
    }

    /// Build a resolver for `target` pushing into `conn`.
    ///
    /// Fails, creating nothing, if the target is malformed or the service
    /// cannot be discovered.
    pub async fn build(&self, target: &str, conn: Arc<dyn ClientConn>) -> Result<Resolver> {
        let target: Target = target.parse()?;
        if let Some(scheme) = &target.scheme {
            if scheme != &self.shared.scheme {
                return Err(DiscoveryError::Configuration(format!(
                    "target scheme '{}' does not match builder scheme '{}'",
                    scheme, self.shared.scheme
                )));
            }
        }

        let service = within(
            self.shared.op_timeout,
            self.shared.registry.discover(&target.endpoint),
        )
        .await?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let core = Arc::new(ResolverCore::new(id, target.endpoint.clone(), conn));
        core.update_srv_cfg(&service);
        self.shared.insert(core.clone());

        tracing::debug!(resolver = id, target = %target, "Resolver built");
        Ok(Resolver::new(core, self.shared.clone()))
    }

    /// Service names with at least one live resolver.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.resolvers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Live resolvers bound to `service`.
    pub fn resolver_count(&self, service: &str) -> usize {
        self.shared
            .resolvers
            .read()
            .get(service)
            .map_or(0, Vec::len)
    }
}
