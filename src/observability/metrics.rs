//! Metrics collection and exposition.
//!
//! # Metrics
//! - `discovery_probe_total` (counter): probe attempts by outcome
//! - `discovery_evictions_total` (counter): nodes unregistered by the health engine
//! - `discovery_health_workers` (gauge): live probe workers
//! - `discovery_cache_writes_total` (counter): disk mirror writes/removals
//! - `discovery_backend_swaps_total` (counter): hot backend replacements
//! - `discovery_resolver_updates_total` (counter): address pushes to client connections

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_probe(outcome: &'static str) {
    metrics::counter!("discovery_probe_total", "outcome" => outcome).increment(1);
}

pub fn record_eviction(service: &str) {
    metrics::counter!("discovery_evictions_total", "service" => service.to_string()).increment(1);
}

pub fn record_worker_count(count: usize) {
    metrics::gauge!("discovery_health_workers").set(count as f64);
}

pub fn record_cache_write(op: &'static str) {
    metrics::counter!("discovery_cache_writes_total", "op" => op).increment(1);
}

pub fn record_backend_swap() {
    metrics::counter!("discovery_backend_swaps_total").increment(1);
}

pub fn record_resolver_update(service: &str) {
    metrics::counter!("discovery_resolver_updates_total", "service" => service.to_string())
        .increment(1);
}
