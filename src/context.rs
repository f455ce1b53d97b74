//! Application context.
//!
//! A [`Suit`] is built once at startup from the shared configuration and a
//! backend connector, then handed to every component that needs discovery.
//! Nothing in the crate reaches for a global instance.

use std::sync::Arc;

use crate::config::validation::validate_config;
use crate::config::{BackendKind, Settings, SharedSettings};
use crate::discovery::{within, BackendConnector, DiscoveryError, Node, Registry, Result};
use crate::health::{HealthChecker, Prober};
use crate::proxy::CachedProxy;
use crate::resolver::Builder;

/// Discovery handles shared by one process.
pub struct Suit {
    settings: SharedSettings,
    registry: Arc<dyn Registry>,
    proxy: Option<Arc<CachedProxy>>,
    builder: Builder,
}

impl Suit {
    /// Construct the configured backend and a resolver builder over it.
    ///
    /// `discovery = "proxy"` wraps `discovery_proxy.connection` in a
    /// [`CachedProxy`]; any other kind is connected directly.
    pub async fn init(
        settings: SharedSettings,
        connector: Arc<dyn BackendConnector>,
        scheme: &str,
    ) -> Result<Self> {
        let current = settings.load_full();
        if let Err(errors) = validate_config(&current) {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DiscoveryError::Configuration(joined));
        }

        let (registry, proxy) = match current.discovery {
            BackendKind::Proxy => {
                let proxy = CachedProxy::new(settings.clone(), connector).await?;
                (proxy.clone() as Arc<dyn Registry>, Some(proxy))
            }
            kind => (connector.connect(kind, &current.coordinator).await?, None),
        };

        let builder =
            Builder::with_op_timeout(scheme, registry.clone(), current.coordinator.op_timeout())
                .await?;
        tracing::info!(
            backend = %current.discovery,
            scheme,
            "Discovery context initialized"
        );

        Ok(Self {
            settings,
            registry,
            proxy,
            builder,
        })
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }

    /// The cached proxy, when the configured backend is one.
    pub fn proxy(&self) -> Option<&Arc<CachedProxy>> {
        self.proxy.as_ref()
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    /// A health engine over this context's registry.
    pub fn health_checker(&self, prober: Arc<dyn Prober>) -> HealthChecker {
        let settings = self.settings.load();
        HealthChecker::new(
            self.registry.clone(),
            prober,
            &settings.health,
            settings.coordinator.op_timeout(),
        )
    }

    /// Push the live health settings into a running engine.
    pub fn apply_health_settings(&self, checker: &HealthChecker) {
        checker.apply_config(&self.settings.load().health);
    }

    /// Register every node, continuing past failures.
    pub async fn register_nodes(&self, service: &str, nodes: &[Node]) -> Result<()> {
        let deadline = self.settings.load().coordinator.op_timeout();
        let mut failed = 0;
        for node in nodes {
            if let Err(e) = within(deadline, self.registry.register(service, node)).await {
                tracing::error!(service, node = %node, error = %e, "Failed to register node");
                failed += 1;
            }
        }
        batch_result(failed, nodes.len())
    }

    /// Unregister every node, continuing past failures.
    pub async fn deregister_nodes(&self, service: &str, nodes: &[Node], graceful: bool) -> Result<()> {
        let deadline = self.settings.load().coordinator.op_timeout();
        let mut failed = 0;
        for node in nodes {
            if let Err(e) = within(deadline, self.registry.unregister(service, node, graceful)).await
            {
                tracing::error!(service, node = %node, error = %e, "Failed to unregister node");
                failed += 1;
            }
        }
        batch_result(failed, nodes.len())
    }

    /// Stop the cached proxy's background loops, if any.
    pub fn shutdown(&self) {
        if let Some(proxy) = &self.proxy {
            proxy.shutdown();
        }
    }
}

fn batch_result(failed: usize, total: usize) -> Result<()> {
    if failed == 0 {
        Ok(())
    } else {
        Err(DiscoveryError::PartialFailure { failed, total })
    }
}
