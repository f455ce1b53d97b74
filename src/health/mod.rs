//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Sweep loop (checker.rs):
//!     Timer → registry.load_all()
//!     → one ProbeItem per (service, node)
//!     → bounded queue (blocks while every worker is busy)
//!
//! Reconciliation loop (checker.rs + pool.rs):
//!     Tick → desired size vs. owned workers
//!     → spawn the delta or cancel the excess
//!
//! Worker (pool.rs → probe.rs):
//!     ProbeItem → ping with deadline, fixed-delay retries
//!     → all attempts failed → registry.unregister(forced)
//!
//! Reporter (reporter.rs):
//!     POST /health/ping {"ping_service"} → {"ok"}
//! ```
//!
//! # Design Decisions
//! - Probe failures never stop a sweep; only load failures delay one
//! - Pause only affects sweeps; stop is permanent
//! - Pool size is level-triggered, so resizes may briefly over- or under-shoot

pub mod checker;
pub mod pool;
pub mod probe;
pub mod reporter;

pub use checker::{HealthChecker, ProbeOutcome};
pub use pool::{PoolStats, ProbeItem, ResizeReport, WorkHandler, WorkerPool};
pub use probe::{HttpProber, PingRequest, PingResponse, Prober, RetryPolicy};
pub use reporter::HealthReporter;
