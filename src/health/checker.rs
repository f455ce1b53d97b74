//! Active health checking of registered nodes.
//!
//! # Responsibilities
//! - Periodically enumerate every registered node
//! - Hand each node to the worker pool through an unbuffered-style queue
//! - Keep the pool at its desired size
//! - Unregister nodes that fail every probe attempt
//!
//! # Design Decisions
//! - A node is dispatched at most once at a time: sweeps skip nodes whose
//!   previous check is still queued or probing
//! - An evicted node is skipped by every sweep whose registry load started
//!   before the eviction finished, since that load may still list it

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::schema::{effective_pool_size, HealthConfig};
use crate::discovery::{within, Registry, Result};
use crate::health::pool::{PoolStats, ProbeItem, WorkHandler, WorkerPool};
use crate::health::probe::{probe_with_retry, Prober, RetryPolicy};
use crate::observability::metrics;

/// Result of checking one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Answered on the given 1-based attempt.
    Alive { attempt: u32 },
    /// Failed every attempt and was unregistered.
    Evicted,
}

/// Dispatch state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// Queued or being checked.
    Checking,
    /// Evicted while the given registry load was the latest.
    Evicted(u64),
}

struct CheckerShared {
    registry: Arc<dyn Registry>,
    prober: Arc<dyn Prober>,
    policy: RetryPolicy,
    op_timeout: Duration,
    claims: DashMap<ProbeItem, Claim>,
    load_generation: AtomicU64,
    desired_workers: AtomicUsize,
    interval_ms: AtomicU64,
    load_retry: Duration,
    pause_poll: Duration,
    resize_tick: Duration,
    paused: AtomicBool,
    running: AtomicBool,
    exit: CancellationToken,
    sweeps: AtomicU64,
    evictions: AtomicU64,
    pool_stats: parking_lot::Mutex<Option<Arc<PoolStats>>>,
}

impl CheckerShared {
    fn desired_workers(&self) -> usize {
        effective_pool_size(self.desired_workers.load(Ordering::SeqCst))
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    async fn check(&self, item: &ProbeItem) -> Result<ProbeOutcome> {
        if let Some(attempt) =
            probe_with_retry(self.prober.as_ref(), &self.policy, &item.service, &item.node).await
        {
            return Ok(ProbeOutcome::Alive { attempt });
        }

        within(
            self.op_timeout,
            self.registry.unregister(&item.service, &item.node, false),
        )
        .await?;
        self.evictions.fetch_add(1, Ordering::SeqCst);
        metrics::record_eviction(&item.service);
        tracing::info!(
            service = %item.service,
            node = %item.node,
            attempts = self.policy.attempts,
            "Evicted unreachable node"
        );
        Ok(ProbeOutcome::Evicted)
    }

    /// Claim `item` for a sweep whose load is `generation`. Returns false if
    /// it is still being checked or was evicted after that load started.
    fn claim(&self, item: &ProbeItem, generation: u64) -> bool {
        match self.claims.entry(item.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Claim::Checking);
                true
            }
            Entry::Occupied(mut slot) => match *slot.get() {
                Claim::Checking => false,
                Claim::Evicted(at) if generation <= at => false,
                Claim::Evicted(_) => {
                    slot.insert(Claim::Checking);
                    true
                }
            },
        }
    }

    fn settle(&self, item: &ProbeItem, evicted: bool) {
        if evicted {
            let at = self.load_generation.load(Ordering::SeqCst);
            self.claims.insert(item.clone(), Claim::Evicted(at));
        } else {
            self.claims.remove(item);
        }
    }

    /// Sleep unless exit is requested first. Returns false on exit.
    async fn pause_for(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.exit.cancelled() => false,
            _ = time::sleep(duration) => true,
        }
    }

    async fn sweep_loop(&self, queue: mpsc::Sender<ProbeItem>) {
        loop {
            if self.exit.is_cancelled() {
                break;
            }

            if self.paused.load(Ordering::SeqCst) {
                if !self.pause_for(self.pause_poll).await {
                    break;
                }
                continue;
            }

            let generation = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
            let services = match within(self.op_timeout, self.registry.load_all()).await {
                Ok(services) => services,
                Err(e) => {
                    tracing::warn!(error = %e, "Health sweep could not load registry, backing off");
                    if !self.pause_for(self.load_retry).await {
                        break;
                    }
                    continue;
                }
            };

            self.sweeps.fetch_add(1, Ordering::SeqCst);
            let total: usize = services.iter().map(|s| s.nodes.len()).sum();
            tracing::debug!(services = services.len(), nodes = total, "Health sweep started");

            let mut skipped = 0usize;
            for service in services {
                for node in service.nodes {
                    let item = ProbeItem::new(service.name.clone(), node);
                    if !self.claim(&item, generation) {
                        skipped += 1;
                        continue;
                    }
                    tokio::select! {
                        _ = self.exit.cancelled() => return,
                        sent = queue.send(item.clone()) => {
                            if sent.is_err() {
                                self.claims.remove(&item);
                                return;
                            }
                        }
                    }
                }
            }
            if skipped > 0 {
                tracing::debug!(skipped, "Skipped nodes with a check in progress");
            }
            self.claims
                .retain(|_, claim| !matches!(claim, Claim::Evicted(at) if *at < generation));

            if !self.pause_for(self.interval()).await {
                break;
            }
        }
    }

    async fn reconcile_loop(self: Arc<Self>, mut pool: WorkerPool) {
        let mut ticker = time::interval(self.resize_tick);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.exit.cancelled() => break,
                _ = ticker.tick() => {
                    let desired = self.desired_workers();
                    if desired != pool.active() {
                        let report = pool.resize(desired);
                        tracing::info!(
                            workers = desired,
                            spawned = report.spawned,
                            retired = report.retired,
                            "Probe worker pool resized"
                        );
                    }
                }
            }
        }

        pool.shutdown().await;
    }
}

#[async_trait]
impl WorkHandler for CheckerShared {
    async fn handle(&self, item: ProbeItem) {
        let evicted = match self.check(&item).await {
            Ok(outcome) => outcome == ProbeOutcome::Evicted,
            Err(e) => {
                tracing::error!(
                    service = %item.service,
                    node = %item.node,
                    error = %e,
                    "Failed to unregister unreachable node"
                );
                false
            }
        };
        self.settle(&item, evicted);
    }
}

/// Health engine: sweep loop plus elastic probe pool.
#[derive(Clone)]
pub struct HealthChecker {
    shared: Arc<CheckerShared>,
}

impl HealthChecker {
    /// `op_timeout` bounds every registry call the checker makes.
    pub fn new(
        registry: Arc<dyn Registry>,
        prober: Arc<dyn Prober>,
        config: &HealthConfig,
        op_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(CheckerShared {
                registry,
                prober,
                policy: RetryPolicy::from(config),
                op_timeout,
                claims: DashMap::new(),
                load_generation: AtomicU64::new(0),
                desired_workers: AtomicUsize::new(config.pool_size),
                interval_ms: AtomicU64::new(config.interval_ms),
                load_retry: Duration::from_millis(config.load_retry_ms),
                pause_poll: Duration::from_millis(config.pause_poll_ms),
                resize_tick: Duration::from_millis(config.resize_tick_ms.max(1)),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(false),
                exit: CancellationToken::new(),
                sweeps: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                pool_stats: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Desired worker count; 0 selects the default.
    pub fn set_pool_size(&self, size: usize) {
        self.shared.desired_workers.store(size, Ordering::SeqCst);
    }

    pub fn pool_size(&self) -> usize {
        self.shared.desired_workers()
    }

    pub fn set_interval(&self, interval: Duration) {
        self.shared
            .interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Apply the runtime-mutable part of a reloaded config.
    pub fn apply_config(&self, config: &HealthConfig) {
        self.set_pool_size(config.pool_size);
        self.set_interval(Duration::from_millis(config.interval_ms));
    }

    /// Suspend sweeps. Workers keep draining queued items.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Stop permanently. A stopped checker cannot be run again.
    pub fn stop(&self) {
        self.shared.exit.cancel();
    }

    pub fn is_exited(&self) -> bool {
        self.shared.exit.is_cancelled()
    }

    /// Completed registry enumerations.
    pub fn sweeps(&self) -> u64 {
        self.shared.sweeps.load(Ordering::SeqCst)
    }

    pub fn evictions(&self) -> u64 {
        self.shared.evictions.load(Ordering::SeqCst)
    }

    /// Worker pool counters, available once `run` has started.
    pub fn pool_stats(&self) -> Option<Arc<PoolStats>> {
        self.shared.pool_stats.lock().clone()
    }

    /// Probe one node and evict it if every attempt fails.
    pub async fn check(&self, item: &ProbeItem) -> Result<ProbeOutcome> {
        self.shared.check(item).await
    }

    /// Run both loops until [`HealthChecker::stop`] is called.
    pub async fn run(&self) {
        if self.is_exited() {
            tracing::warn!("Health checker already stopped; not restarting");
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Health checker already running");
            return;
        }

        tracing::info!(
            workers = self.pool_size(),
            interval_ms = self.interval().as_millis() as u64,
            attempts = self.shared.policy.attempts,
            "Health checker starting"
        );

        let (tx, rx) = mpsc::channel(1);
        let pool = WorkerPool::new(
            rx,
            self.shared.clone() as Arc<dyn WorkHandler>,
            self.shared.exit.child_token(),
        );
        *self.shared.pool_stats.lock() = Some(pool.stats());

        let reconcile = tokio::spawn(self.shared.clone().reconcile_loop(pool));
        self.shared.sweep_loop(tx).await;

        if let Err(e) = reconcile.await {
            tracing::error!(error = %e, "Pool reconciliation task failed");
        }
        tracing::info!("Health checker stopped");
    }
}
