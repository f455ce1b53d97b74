//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_discovery::config::watcher::shared;
use rpc_discovery::config::{BackendKind, Settings, SharedSettings};
use rpc_discovery::discovery::{
    ChangeEvent, DiscoveryError, MemoryRegistry, Node, Registry, Result, Service, UpdateCallback,
    WatchId,
};
use rpc_discovery::health::Prober;

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Async flavour of [`wait_until`].
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Settings with every timer shrunk to test scale.
pub fn fast_settings(cache_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.discovery = BackendKind::Proxy;
    settings.discovery_proxy.dir = cache_dir.to_path_buf();
    settings.discovery_proxy.connection = BackendKind::Memory;
    settings.discovery_proxy.poll_interval_ms = 20;
    settings.discovery_proxy.sync_retry_ms = 20;
    settings.coordinator.op_timeout_ms = 500;
    settings.health.pool_size = 4;
    settings.health.interval_ms = 20;
    settings.health.probe_timeout_ms = 50;
    settings.health.attempts = 3;
    settings.health.retry_delay_ms = 5;
    settings.health.load_retry_ms = 20;
    settings.health.pause_poll_ms = 10;
    settings.health.resize_tick_ms = 10;
    settings
}

pub fn fast_shared(cache_dir: &Path) -> SharedSettings {
    shared(fast_settings(cache_dir))
}

/// Replace the live settings through `edit`.
pub fn update_settings<F>(settings: &SharedSettings, edit: F)
where
    F: FnOnce(&mut Settings),
{
    let mut next = (*settings.load_full()).clone();
    edit(&mut next);
    settings.store(Arc::new(next));
}

/// Registry wrapper counting calls. While stalled, reads and unregisters
/// never complete.
pub struct CountingRegistry {
    pub inner: Arc<MemoryRegistry>,
    pub unregisters: AtomicUsize,
    pub discovers: AtomicUsize,
    pub loads: AtomicUsize,
    stalled: AtomicBool,
}

impl CountingRegistry {
    pub fn new(inner: Arc<MemoryRegistry>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            unregisters: AtomicUsize::new(0),
            discovers: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            stalled: AtomicBool::new(false),
        })
    }

    pub fn unregisters(&self) -> usize {
        self.unregisters.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn gate(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Registry for CountingRegistry {
    async fn register(&self, service: &str, node: &Node) -> Result<()> {
        self.inner.register(service, node).await
    }

    async fn unregister(&self, service: &str, node: &Node, graceful: bool) -> Result<()> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        self.gate().await;
        self.inner.unregister(service, node, graceful).await
    }

    async fn discover(&self, service: &str) -> Result<Service> {
        self.discovers.fetch_add(1, Ordering::SeqCst);
        self.gate().await;
        self.inner.discover(service).await
    }

    async fn load_all(&self) -> Result<Vec<Service>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.gate().await;
        self.inner.load_all().await
    }

    fn on_updated(&self, callback: UpdateCallback) -> WatchId {
        self.inner.on_updated(callback)
    }

    fn remove_watch(&self, id: WatchId) -> bool {
        self.inner.remove_watch(id)
    }
}

/// Prober answering from a per-port script; unscripted ports are alive.
///
/// Each scripted port pops one answer per call; an exhausted script keeps
/// answering with its last entry.
#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<u16, Vec<bool>>>,
    calls: Mutex<HashMap<u16, usize>>,
}

impl ScriptedProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, port: u16, answers: &[bool]) {
        self.scripts.lock().insert(port, answers.to_vec());
    }

    pub fn calls(&self, port: u16) -> usize {
        self.calls.lock().get(&port).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn ping(&self, _service: &str, node: &Node) -> Result<bool> {
        let n = {
            let mut calls = self.calls.lock();
            let n = calls.entry(node.port).or_insert(0);
            *n += 1;
            *n
        };

        let answer = match self.scripts.lock().get(&node.port) {
            Some(script) if !script.is_empty() => script[(n - 1).min(script.len() - 1)],
            _ => true,
        };
        if answer {
            Ok(true)
        } else {
            Err(DiscoveryError::ProbeFailed("connection refused".into()))
        }
    }
}

/// Prober that takes `delay` per call and always reports the node unknown.
pub struct SlowDeadProber {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowDeadProber {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Prober for SlowDeadProber {
    async fn ping(&self, _service: &str, _node: &Node) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(false)
    }
}

/// Record every event delivered to an observer.
pub fn recorder(registry: &dyn Registry) -> Arc<Mutex<Vec<ChangeEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry.on_updated(Arc::new(move |event: &ChangeEvent| sink.lock().push(event.clone())));
    seen
}
