//! Per-connection resolver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::discovery::{within, Service};
use crate::observability::metrics;
use crate::resolver::builder::BuilderShared;
use crate::resolver::conn::{ClientConn, LbPolicy, ResolvedState};

/// The part of a resolver the builder keeps for fan-out.
pub(crate) struct ResolverCore {
    pub(crate) id: u64,
    pub(crate) service: String,
    conn: Arc<dyn ClientConn>,
}

impl ResolverCore {
    pub(crate) fn new(id: u64, service: String, conn: Arc<dyn ClientConn>) -> Self {
        Self { id, service, conn }
    }

    /// Push `service` into the connection. Returns false if it belongs to another name.
    pub(crate) fn update_srv_cfg(&self, service: &Service) -> bool {
        if service.name != self.service {
            return false;
        }

        self.conn.update_state(ResolvedState {
            addresses: service.addresses(),
            lb_policy: LbPolicy::RoundRobin,
        });
        metrics::record_resolver_update(&self.service);
        tracing::trace!(
            resolver = self.id,
            service = %self.service,
            nodes = service.nodes.len(),
            "Pushed address set"
        );
        true
    }
}

/// Resolver bound to one service name and one client connection.
///
/// Dropping the resolver closes it.
pub struct Resolver {
    core: Arc<ResolverCore>,
    builder: Arc<BuilderShared>,
    closed: AtomicBool,
}

impl Resolver {
    pub(crate) fn new(core: Arc<ResolverCore>, builder: Arc<BuilderShared>) -> Self {
        Self {
            core,
            builder,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn service_name(&self) -> &str {
        &self.core.service
    }

    /// Replace the connection's address set with `service`, if the name matches.
    pub fn update_srv_cfg(&self, service: &Service) -> bool {
        self.core.update_srv_cfg(service)
    }

    /// Re-read the service out of band and push the result.
    ///
    /// Failures are logged; the connection keeps its last address set.
    pub async fn resolve_now(&self) {
        let lookup = self.builder.registry.discover(&self.core.service);
        match within(self.builder.op_timeout, lookup).await {
            Ok(service) => {
                self.core.update_srv_cfg(&service);
            }
            Err(e) => {
                tracing::error!(
                    service = %self.core.service,
                    error = %e,
                    "Re-resolution failed"
                );
            }
        }
    }

    /// Detach from the builder. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.builder.remove(&self.core);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.core.id)
            .field("service", &self.core.service)
            .field("closed", &self.is_closed())
            .finish()
    }
}
