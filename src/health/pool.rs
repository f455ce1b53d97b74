//! Elastic probe worker pool.
//!
//! # Responsibilities
//! - Own one cancellation token and join handle per worker
//! - Grow by exactly the missing workers, shrink by cancelling exactly the excess
//! - Share one bounded work queue between all workers
//!
//! # Design Decisions
//! - Level-triggered: the caller reconciles toward a desired size on a tick
//! - A retired worker finishes the item it holds; pool shutdown abandons it

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::Node;
use crate::observability::metrics;

/// One node to probe on behalf of one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeItem {
    pub service: String,
    pub node: Node,
}

impl ProbeItem {
    pub fn new(service: impl Into<String>, node: Node) -> Self {
        Self {
            service: service.into(),
            node,
        }
    }
}

/// Processes items taken from the queue.
#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    async fn handle(&self, item: ProbeItem);
}

/// Counters observable while the pool is owned by its reconciliation task.
#[derive(Debug, Default)]
pub struct PoolStats {
    active: AtomicUsize,
    running: AtomicUsize,
    spawned: AtomicU64,
    exit_signals: AtomicU64,
}

impl PoolStats {
    /// Workers owned by the pool.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Worker tasks still alive, including retired ones finishing an item.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn exit_signals(&self) -> u64 {
        self.exit_signals.load(Ordering::SeqCst)
    }
}

/// Outcome of one [`WorkerPool::resize`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResizeReport {
    pub spawned: usize,
    pub retired: usize,
}

struct Worker {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor of probe workers.
pub struct WorkerPool {
    queue: Arc<Mutex<mpsc::Receiver<ProbeItem>>>,
    handler: Arc<dyn WorkHandler>,
    root: CancellationToken,
    workers: Vec<Worker>,
    retired: Vec<JoinHandle<()>>,
    next_id: u64,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(
        queue: mpsc::Receiver<ProbeItem>,
        handler: Arc<dyn WorkHandler>,
        root: CancellationToken,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(queue)),
            handler,
            root,
            workers: Vec::new(),
            retired: Vec::new(),
            next_id: 0,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        self.stats.clone()
    }

    pub fn active(&self) -> usize {
        self.workers.len()
    }

    /// Spawn or retire workers until `target` are owned.
    pub fn resize(&mut self, target: usize) -> ResizeReport {
        self.reap();

        let mut report = ResizeReport::default();
        while self.workers.len() < target {
            self.spawn_worker();
            report.spawned += 1;
        }
        while self.workers.len() > target {
            if let Some(worker) = self.workers.pop() {
                worker.token.cancel();
                self.stats.exit_signals.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(worker = worker.id, "Exit signal sent");
                self.retired.push(worker.handle);
                report.retired += 1;
            }
        }

        self.stats.active.store(self.workers.len(), Ordering::SeqCst);
        metrics::record_worker_count(self.workers.len());
        report
    }

    /// Cancel every worker and wait for all of them to stop.
    pub async fn shutdown(mut self) {
        self.root.cancel();
        let handles = self
            .workers
            .drain(..)
            .map(|w| w.handle)
            .chain(self.retired.drain(..));
        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Probe worker panicked");
            }
        }
        self.stats.active.store(0, Ordering::SeqCst);
        metrics::record_worker_count(0);
    }

    fn spawn_worker(&mut self) {
        self.next_id += 1;
        let id = self.next_id;
        let token = self.root.child_token();
        self.stats.running.fetch_add(1, Ordering::SeqCst);
        self.stats.spawned.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(run_worker(
            id,
            self.queue.clone(),
            self.handler.clone(),
            token.clone(),
            self.root.clone(),
            self.stats.clone(),
        ));
        self.workers.push(Worker { id, token, handle });
    }

    /// Forget workers whose task already ended.
    fn reap(&mut self) {
        self.workers.retain(|w| !w.handle.is_finished());
        self.retired.retain(|h| !h.is_finished());
    }
}

async fn run_worker(
    id: u64,
    queue: Arc<Mutex<mpsc::Receiver<ProbeItem>>>,
    handler: Arc<dyn WorkHandler>,
    token: CancellationToken,
    root: CancellationToken,
    stats: Arc<PoolStats>,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            item = async { queue.lock().await.recv().await } => item,
        };

        let Some(item) = next else {
            break;
        };

        tokio::select! {
            _ = root.cancelled() => break,
            _ = handler.handle(item) => {}
        }
    }

    stats.running.fetch_sub(1, Ordering::SeqCst);
    tracing::trace!(worker = id, "Probe worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl WorkHandler for Counting {
        async fn handle(&self, _item: ProbeItem) {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_for_running(stats: &PoolStats, expected: usize) {
        for _ in 0..100 {
            if stats.running() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} running workers, found {}", expected, stats.running());
    }

    #[tokio::test]
    async fn test_shrink_sends_exact_exit_signals() {
        let (_tx, rx) = mpsc::channel(1);
        let mut pool = WorkerPool::new(rx, Arc::new(Counting::default()), CancellationToken::new());
        let stats = pool.stats();

        assert_eq!(pool.resize(5), ResizeReport { spawned: 5, retired: 0 });
        wait_for_running(&stats, 5).await;

        assert_eq!(pool.resize(2), ResizeReport { spawned: 0, retired: 3 });
        assert_eq!(stats.exit_signals(), 3);
        assert_eq!(pool.active(), 2);
        wait_for_running(&stats, 2).await;

        pool.shutdown().await;
        assert_eq!(stats.running(), 0);
    }

    #[tokio::test]
    async fn test_grow_spawns_exact_delta() {
        let (_tx, rx) = mpsc::channel(1);
        let mut pool = WorkerPool::new(rx, Arc::new(Counting::default()), CancellationToken::new());
        let stats = pool.stats();

        pool.resize(2);
        assert_eq!(pool.resize(5), ResizeReport { spawned: 3, retired: 0 });
        assert_eq!(stats.spawned(), 5);
        assert_eq!(stats.active(), 5);
        assert_eq!(pool.resize(5), ResizeReport::default());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_workers_drain_queue() {
        let (tx, rx) = mpsc::channel(1);
        let handler = Arc::new(Counting::default());
        let mut pool = WorkerPool::new(rx, handler.clone(), CancellationToken::new());
        pool.resize(3);

        for port in 1..=10 {
            tx.send(ProbeItem::new("orders", Node::new("10.0.0.1", port)))
                .await
                .unwrap();
        }
        for _ in 0..100 {
            if handler.handled.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.handled.load(Ordering::SeqCst), 10);

        pool.shutdown().await;
    }
}
