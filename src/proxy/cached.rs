//! Disk-cached discovery proxy.
//!
//! # Responsibilities
//! - Delegate every registry operation to the wrapped backend
//! - Mirror every change event to one file per service
//! - Periodically rewrite the full mirror and prune stale files
//! - Rebuild the wrapped backend when its connection settings change
//! - Serve reads from disk while the backend is unreachable
//!
//! # Design Decisions
//! - The active backend lives behind an `ArcSwap` so readers never block on a swap
//! - The swap and the exit flag share one lock: shutdown either observes a
//!   finished swap or prevents the next one
//! - Observers subscribe to the proxy, not to the wrapped backend, so they
//!   survive backend swaps
//! - All mirror I/O runs under one lock. Services changed by events while a
//!   full sync is loading are recorded and left alone by that pass, since
//!   their files are newer than its snapshot

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::SharedSettings;
use crate::discovery::{
    within, BackendConnector, ChangeEvent, EventKind, Node, Registry, Result, Service,
    UpdateCallback, WatchId, Watchers,
};
use crate::observability::metrics;
use crate::proxy::cache;
use crate::proxy::snapshot::BackendSnapshot;

struct ActiveBackend {
    registry: Arc<dyn Registry>,
    dir: PathBuf,
    watch: WatchId,
}

struct ProxyControl {
    applied: BackendSnapshot,
    exited: bool,
}

/// Services written by events since the current full sync started loading.
#[derive(Default)]
struct MirrorState {
    tracking: bool,
    touched: HashSet<String>,
}

type MirrorLock = Arc<Mutex<MirrorState>>;

struct ProxyShared {
    settings: SharedSettings,
    connector: Arc<dyn BackendConnector>,
    control: Mutex<ProxyControl>,
    active: ArcSwap<ActiveBackend>,
    mirror: MirrorLock,
    rerun: Notify,
    watchers: Arc<Watchers>,
    rebuilds: AtomicU64,
    sync_passes: AtomicU64,
}

/// Attach the disk mirror and forwarding observer to `registry`.
fn attach(
    registry: Arc<dyn Registry>,
    dir: PathBuf,
    watchers: &Arc<Watchers>,
    mirror: &MirrorLock,
) -> ActiveBackend {
    let forward = Arc::downgrade(watchers);
    let mirror = mirror.clone();
    let mirror_dir = dir.clone();
    let watch = registry.on_updated(Arc::new(move |event: &ChangeEvent| {
        {
            let mut state = mirror.lock();
            mirror_event(&mirror_dir, event);
            if state.tracking {
                state.touched.insert(event.service.name.clone());
            }
        }
        if let Some(watchers) = forward.upgrade() {
            watchers.publish(event);
        }
    }));
    ActiveBackend {
        registry,
        dir,
        watch,
    }
}

fn mirror_event(dir: &Path, event: &ChangeEvent) {
    let res = match event.kind {
        EventKind::Created | EventKind::Updated => cache::write_service(dir, &event.service),
        EventKind::Deleted => cache::remove_service(dir, &event.service.name),
    };
    if let Err(e) = res {
        tracing::error!(
            service = %event.service.name,
            event = event.kind.as_str(),
            error = %e,
            "Failed to mirror change to disk"
        );
    }
}

impl ProxyShared {
    fn is_exited(&self) -> bool {
        self.control.lock().exited
    }

    /// Reconnect if the backend-relevant settings changed.
    async fn check_config(&self) {
        let candidate = BackendSnapshot::from_settings(&self.settings.load());
        if !candidate.differs_from(&self.control.lock().applied) {
            return;
        }

        tracing::info!(
            kind = %candidate.kind,
            dir = %candidate.dir.display(),
            endpoints = ?candidate.params.endpoints,
            "Discovery backend settings changed, reconnecting"
        );

        let registry = match self.connector.connect(candidate.kind, &candidate.params).await {
            Ok(registry) => registry,
            Err(e) => {
                tracing::error!(error = %e, "Reconnect failed, keeping current backend");
                return;
            }
        };

        let mut control = self.control.lock();
        if control.exited {
            tracing::debug!("Proxy exited during reconnect, discarding new backend");
            return;
        }

        let next = attach(registry, candidate.dir.clone(), &self.watchers, &self.mirror);
        let previous = self.active.swap(Arc::new(next));
        previous.registry.remove_watch(previous.watch);
        control.applied = candidate;
        drop(control);

        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        metrics::record_backend_swap();
        self.rerun.notify_one();
        tracing::info!("Discovery backend swapped");
    }

    /// Start recording event-driven writes ahead of a full load.
    fn begin_sync(&self) {
        let mut state = self.mirror.lock();
        state.tracking = true;
        state.touched.clear();
    }

    /// Rewrite the mirror from `services`, skipping anything events touched
    /// after the load began.
    fn finish_sync(&self, dir: &Path, services: &[Service]) -> Result<()> {
        let mut state = self.mirror.lock();
        let res = cache::mirror_snapshot(dir, services, &state.touched);
        state.tracking = false;
        state.touched.clear();
        res
    }

    fn abandon_sync(&self) {
        let mut state = self.mirror.lock();
        state.tracking = false;
        state.touched.clear();
    }
}

async fn config_watch_loop(shared: Weak<ProxyShared>) {
    loop {
        let interval = match shared.upgrade() {
            Some(s) if !s.is_exited() => s.settings.load().discovery_proxy.poll_interval(),
            _ => break,
        };
        tokio::time::sleep(interval).await;

        match shared.upgrade() {
            Some(s) if !s.is_exited() => s.check_config().await,
            _ => break,
        }
    }
    tracing::debug!("Proxy config watch stopped");
}

/// Registry decorator that keeps a disk mirror of the wrapped backend.
pub struct CachedProxy {
    shared: Arc<ProxyShared>,
    config_watch: Mutex<Option<JoinHandle<()>>>,
}

impl CachedProxy {
    /// Connect the wrapped backend and start watching the configuration.
    pub async fn new(
        settings: SharedSettings,
        connector: Arc<dyn BackendConnector>,
    ) -> Result<Arc<Self>> {
        let applied = BackendSnapshot::from_settings(&settings.load());
        let registry = connector.connect(applied.kind, &applied.params).await?;

        let watchers = Arc::new(Watchers::new());
        let mirror = MirrorLock::default();
        let active = attach(registry, applied.dir.clone(), &watchers, &mirror);
        tracing::info!(
            kind = %applied.kind,
            dir = %applied.dir.display(),
            "Cached discovery proxy connected"
        );

        let shared = Arc::new(ProxyShared {
            settings,
            connector,
            control: Mutex::new(ProxyControl {
                applied,
                exited: false,
            }),
            active: ArcSwap::from_pointee(active),
            mirror,
            rerun: Notify::new(),
            watchers,
            rebuilds: AtomicU64::new(0),
            sync_passes: AtomicU64::new(0),
        });

        let handle = tokio::spawn(config_watch_loop(Arc::downgrade(&shared)));
        Ok(Arc::new(Self {
            shared,
            config_watch: Mutex::new(Some(handle)),
        }))
    }

    /// Full-sync loop. Returns once [`CachedProxy::shutdown`] is called.
    ///
    /// Each pass loads the whole backend, rewrites the mirror and prunes
    /// files of vanished services, then waits for a backend swap.
    pub async fn run(&self) {
        loop {
            if self.shared.is_exited() {
                break;
            }

            let active = self.shared.active.load_full();
            self.shared.sync_passes.fetch_add(1, Ordering::SeqCst);

            self.shared.begin_sync();
            match within(self.op_timeout(), active.registry.load_all()).await {
                Ok(services) => {
                    if let Err(e) = self.shared.finish_sync(&active.dir, &services) {
                        tracing::warn!(error = %e, "Full mirror pass incomplete");
                    } else {
                        tracing::debug!(services = services.len(), "Disk mirror synchronized");
                    }
                    self.shared.rerun.notified().await;
                }
                Err(e) => {
                    self.shared.abandon_sync();
                    let retry = self.shared.settings.load().discovery_proxy.sync_retry();
                    tracing::warn!(error = %e, retry_ms = retry.as_millis() as u64, "Full sync failed");
                    tokio::select! {
                        _ = self.shared.rerun.notified() => {}
                        _ = tokio::time::sleep(retry) => {}
                    }
                }
            }
        }
        tracing::info!("Proxy sync loop stopped");
    }

    /// Stop both background loops. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut control = self.shared.control.lock();
            if control.exited {
                return;
            }
            control.exited = true;
        }
        self.shared.rerun.notify_one();

        let active = self.shared.active.load();
        active.registry.remove_watch(active.watch);
        if let Some(handle) = self.config_watch.lock().take() {
            handle.abort();
        }
        tracing::info!("Cached discovery proxy shut down");
    }

    pub fn is_exited(&self) -> bool {
        self.shared.is_exited()
    }

    /// Backend swaps performed since construction.
    pub fn rebuilds(&self) -> u64 {
        self.shared.rebuilds.load(Ordering::SeqCst)
    }

    /// Full-sync passes started since construction.
    pub fn sync_passes(&self) -> u64 {
        self.shared.sync_passes.load(Ordering::SeqCst)
    }

    /// Directory of the active mirror.
    pub fn cache_dir(&self) -> PathBuf {
        self.shared.active.load().dir.clone()
    }

    /// The currently wrapped backend.
    pub fn backend(&self) -> Arc<dyn Registry> {
        self.shared.active.load().registry.clone()
    }

    fn op_timeout(&self) -> std::time::Duration {
        self.shared.settings.load().coordinator.op_timeout()
    }
}

impl Drop for CachedProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl Registry for CachedProxy {
    async fn register(&self, service: &str, node: &Node) -> Result<()> {
        let active = self.shared.active.load_full();
        within(self.op_timeout(), active.registry.register(service, node)).await
    }

    async fn unregister(&self, service: &str, node: &Node, graceful: bool) -> Result<()> {
        let active = self.shared.active.load_full();
        within(
            self.op_timeout(),
            active.registry.unregister(service, node, graceful),
        )
        .await
    }

    async fn discover(&self, service: &str) -> Result<Service> {
        let active = self.shared.active.load_full();
        match within(self.op_timeout(), active.registry.discover(service)).await {
            Err(e) if e.is_unavailable() => {
                tracing::warn!(service, error = %e, "Backend unavailable, serving from disk mirror");
                cache::read_service(&active.dir, service)
            }
            other => other,
        }
    }

    async fn load_all(&self) -> Result<Vec<Service>> {
        let active = self.shared.active.load_full();
        match within(self.op_timeout(), active.registry.load_all()).await {
            Err(e) if e.is_unavailable() => {
                tracing::warn!(error = %e, "Backend unavailable, serving from disk mirror");
                cache::load_all(&active.dir)
            }
            other => other,
        }
    }

    fn on_updated(&self, callback: UpdateCallback) -> WatchId {
        self.shared.watchers.subscribe(callback)
    }

    fn remove_watch(&self, id: WatchId) -> bool {
        self.shared.watchers.unsubscribe(id)
    }
}
