//! Health engine behaviour: eviction, retries, pool sizing, probe wire contract.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use rpc_discovery::discovery::{DiscoveryError, MemoryRegistry, Node, Registry};
use rpc_discovery::health::{
    HealthChecker, HealthReporter, HttpProber, PingResponse, ProbeItem, ProbeOutcome, Prober,
};
use rpc_discovery::lifecycle::Shutdown;

use common::{
    fast_settings, wait_until, wait_until_async, CountingRegistry, ScriptedProber, SlowDeadProber,
};

fn checker_over(
    registry: Arc<dyn Registry>,
    prober: Arc<dyn Prober>,
) -> (HealthChecker, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let settings = fast_settings(dir.path());
    let checker = HealthChecker::new(
        registry,
        prober,
        &settings.health,
        settings.coordinator.op_timeout(),
    );
    (checker, dir)
}

#[tokio::test]
async fn test_node_failing_every_attempt_is_evicted_once() {
    let registry = CountingRegistry::new(Arc::new(MemoryRegistry::new()));
    registry.register("orders", &Node::new("10.0.0.1", 9001)).await.unwrap();
    registry.register("orders", &Node::new("10.0.0.2", 9002)).await.unwrap();

    let prober = ScriptedProber::new();
    prober.script(9001, &[false, false, false]);
    let (checker, _dir) = checker_over(registry.clone(), prober.clone());

    let outcome = checker
        .check(&ProbeItem::new("orders", Node::new("10.0.0.1", 9001)))
        .await
        .unwrap();
    assert_eq!(outcome, ProbeOutcome::Evicted);
    assert_eq!(prober.calls(9001), 3);
    assert_eq!(registry.unregisters(), 1);
    assert_eq!(checker.evictions(), 1);

    let remaining = registry.discover("orders").await.unwrap();
    assert_eq!(remaining.nodes, vec![Node::new("10.0.0.2", 9002)]);
}

#[tokio::test]
async fn test_single_failure_is_not_evicted() {
    let registry = CountingRegistry::new(Arc::new(MemoryRegistry::new()));
    registry.register("orders", &Node::new("10.0.0.1", 9001)).await.unwrap();

    let prober = ScriptedProber::new();
    prober.script(9001, &[false, true]);
    let (checker, _dir) = checker_over(registry.clone(), prober.clone());

    let outcome = checker
        .check(&ProbeItem::new("orders", Node::new("10.0.0.1", 9001)))
        .await
        .unwrap();
    assert_eq!(outcome, ProbeOutcome::Alive { attempt: 2 });
    assert_eq!(prober.calls(9001), 2);
    assert_eq!(registry.unregisters(), 0);
}

#[tokio::test]
async fn test_sweeps_evict_dead_nodes_only() {
    let registry = CountingRegistry::new(Arc::new(MemoryRegistry::new()));
    for port in [9001, 9002, 9003] {
        registry.register("orders", &Node::new("10.0.0.1", port)).await.unwrap();
    }
    registry.register("payments", &Node::new("10.0.1.1", 7000)).await.unwrap();

    let prober = ScriptedProber::new();
    prober.script(9002, &[false]);
    prober.script(7000, &[false]);
    let (checker, _dir) = checker_over(registry.clone(), prober.clone());
    checker.set_interval(Duration::from_millis(100));

    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };

    let inner = registry.inner.clone();
    assert!(
        wait_until_async(Duration::from_secs(5), || {
            let inner = inner.clone();
            async move {
                let orders_ok = inner
                    .discover("orders")
                    .await
                    .map(|s| s.nodes.len() == 2)
                    .unwrap_or(false);
                let payments_gone = inner.discover("payments").await.is_err();
                orders_ok && payments_gone
            }
        })
        .await
    );

    let orders = registry.discover("orders").await.unwrap();
    assert!(!orders.nodes.contains(&Node::new("10.0.0.1", 9002)));
    assert!(wait_until(Duration::from_secs(5), || checker.evictions() == 2).await);

    checker.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_slow_checks_are_not_dispatched_twice() {
    let registry = CountingRegistry::new(Arc::new(MemoryRegistry::new()));
    registry.register("orders", &Node::new("10.0.0.1", 9001)).await.unwrap();
    registry.register("orders", &Node::new("10.0.0.2", 9002)).await.unwrap();

    // Each check takes three 40ms attempts, far longer than the 20ms interval.
    let prober = SlowDeadProber::new(Duration::from_millis(40));
    let (checker, _dir) = checker_over(registry.clone(), prober.clone());

    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };

    assert!(wait_until(Duration::from_secs(5), || checker.evictions() == 2).await);
    let sweeps = checker.sweeps();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(checker.sweeps() > sweeps);

    assert_eq!(registry.unregisters(), 2);
    assert_eq!(checker.evictions(), 2);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 6);
    assert!(registry.inner.discover("orders").await.is_err());

    checker.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_stalled_registry_cannot_wedge_the_checker() {
    let registry = CountingRegistry::new(Arc::new(MemoryRegistry::new()));
    registry.register("orders", &Node::new("10.0.0.1", 9001)).await.unwrap();
    registry.set_stalled(true);

    let (checker, _dir) = checker_over(registry.clone(), ScriptedProber::new());
    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };

    // Each stalled load gives up at the 500ms deadline and backs off.
    assert!(wait_until(Duration::from_secs(5), || registry.loads() >= 2).await);
    assert_eq!(checker.sweeps(), 0);

    registry.set_stalled(false);
    assert!(wait_until(Duration::from_secs(5), || checker.sweeps() >= 1).await);

    checker.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_stalled_eviction_times_out() {
    let registry = CountingRegistry::new(Arc::new(MemoryRegistry::new()));
    registry.register("orders", &Node::new("10.0.0.1", 9001)).await.unwrap();

    let prober = ScriptedProber::new();
    prober.script(9001, &[false]);
    let (checker, _dir) = checker_over(registry.clone(), prober);
    registry.set_stalled(true);

    let res = tokio::time::timeout(
        Duration::from_secs(5),
        checker.check(&ProbeItem::new("orders", Node::new("10.0.0.1", 9001))),
    )
    .await
    .unwrap();
    assert!(matches!(res, Err(DiscoveryError::Timeout(_))));
    assert_eq!(checker.evictions(), 0);
}

#[tokio::test]
async fn test_pool_converges_to_desired_size() {
    let registry = Arc::new(MemoryRegistry::new());
    let (checker, _dir) = checker_over(registry, ScriptedProber::new());

    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };

    assert!(wait_until(Duration::from_secs(5), || checker.pool_stats().is_some()).await);
    let stats = checker.pool_stats().unwrap();
    assert!(wait_until(Duration::from_secs(5), || stats.running() == 4).await);

    checker.set_pool_size(2);
    assert!(wait_until(Duration::from_secs(5), || stats.running() == 2).await);
    assert_eq!(stats.exit_signals(), 2);
    assert_eq!(stats.active(), 2);

    checker.set_pool_size(6);
    assert!(wait_until(Duration::from_secs(5), || stats.running() == 6).await);
    assert_eq!(stats.spawned(), 8);

    checker.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.running(), 0);
}

#[tokio::test]
async fn test_pause_stops_sweeps_and_stop_is_permanent() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register("orders", &Node::new("10.0.0.1", 9001)).await.unwrap();
    let (checker, _dir) = checker_over(registry, ScriptedProber::new());

    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };
    assert!(wait_until(Duration::from_secs(5), || checker.sweeps() >= 2).await);

    checker.pause();
    assert!(checker.is_paused());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frozen = checker.sweeps();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(checker.sweeps(), frozen);

    checker.resume();
    assert!(wait_until(Duration::from_secs(5), || checker.sweeps() > frozen).await);

    checker.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(checker.is_exited());

    // A stopped checker refuses to run again.
    tokio::time::timeout(Duration::from_secs(1), checker.run())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_load_failure_backs_off_and_recovers() {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register("orders", &Node::new("10.0.0.1", 9001)).await.unwrap();
    registry.set_available(false);
    let (checker, _dir) = checker_over(registry.clone(), ScriptedProber::new());

    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(checker.sweeps(), 0);

    registry.set_available(true);
    assert!(wait_until(Duration::from_secs(5), || checker.sweeps() >= 1).await);

    checker.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

async fn start_reporter(names: &[&str], shutdown: &Shutdown) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reporter = HealthReporter::new(names.iter().copied());
    tokio::spawn(reporter.serve(listener, shutdown.subscribe()));
    port
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_http_prober_speaks_ping_contract() {
    let shutdown = Shutdown::new();
    let port = start_reporter(&["orders"], &shutdown).await;
    let node = Node::new("127.0.0.1", port);
    let prober = HttpProber::new();

    assert!(prober.ping("orders", &node).await.unwrap());
    assert!(!prober.ping("billing", &node).await.unwrap());

    let dead = Node::new("127.0.0.1", closed_port().await);
    assert!(prober.ping("orders", &dead).await.is_err());

    let body: PingResponse = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/health/ping", port))
        .json(&serde_json::json!({ "ping_service": "orders" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body.ok);

    shutdown.trigger();
}

#[tokio::test]
async fn test_end_to_end_eviction_over_http() {
    let shutdown = Shutdown::new();
    let live = Node::new("127.0.0.1", start_reporter(&["orders"], &shutdown).await);
    let wrong = Node::new("127.0.0.1", start_reporter(&["payments"], &shutdown).await);
    let dead = Node::new("127.0.0.1", closed_port().await);

    let registry = CountingRegistry::new(Arc::new(MemoryRegistry::new()));
    for node in [&live, &wrong, &dead] {
        registry.register("orders", node).await.unwrap();
    }

    let (checker, _dir) = checker_over(registry.clone(), Arc::new(HttpProber::new()));
    let task = {
        let checker = checker.clone();
        tokio::spawn(async move { checker.run().await })
    };

    let inner = registry.inner.clone();
    let expected = vec![live.clone()];
    assert!(
        wait_until_async(Duration::from_secs(10), || {
            let inner = inner.clone();
            let expected = expected.clone();
            async move {
                inner
                    .discover("orders")
                    .await
                    .map(|s| s.nodes == expected)
                    .unwrap_or(false)
            }
        })
        .await
    );
    assert!(registry.unregisters.load(Ordering::SeqCst) >= 2);

    checker.stop();
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}
