//! Disk-cached discovery proxy.
//!
//! # Data Flow
//! ```text
//! wrapped backend ──ChangeEvent──▶ mirror_event ──▶ {dir}/{service}.json
//!                                       │
//!                                       └──▶ proxy watchers (Builders, ...)
//!
//! config watch (every poll_interval)
//!     → BackendSnapshot differs? → connect → swap → wake sync loop
//!
//! sync loop
//!     → load_all → rewrite mirror → prune stale files → wait for swap
//! ```

pub mod cache;
pub mod cached;
pub mod snapshot;

pub use cached::CachedProxy;
pub use snapshot::BackendSnapshot;
