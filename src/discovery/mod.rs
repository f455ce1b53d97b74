//! Service discovery contract.
//!
//! # Data Flow
//! ```text
//! Backend (memory / coordinator / cached proxy)
//!     → register / unregister mutate membership
//!     → ChangeEvent published to every watcher, in order
//!         → resolver::Builder fans out to resolvers
//!         → proxy::CachedProxy mirrors to disk
//!
//! discover / load_all
//!     → point-in-time Service snapshots
//!     → health::HealthChecker sweeps, resolvers re-resolve
//! ```
//!
//! # Design Decisions
//! - Services always travel as whole snapshots, never as diffs
//! - Observers form an ordered list; `on_updated` appends and returns a handle
//! - Deadlines are applied by the caller with [`within`]; dropping the future cancels

pub mod connector;
pub mod error;
pub mod memory;
pub mod types;
pub mod watchers;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use connector::{BackendConnector, MemoryConnector};
pub use error::{DiscoveryError, Result};
pub use memory::MemoryRegistry;
pub use types::{ChangeEvent, EventKind, Node, Service};
pub use watchers::Watchers;

/// Observer invoked synchronously for every change event.
pub type UpdateCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned by [`Registry::on_updated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Capability every discovery backend provides.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Add `node` to `service`. Registering a present node is a no-op.
    async fn register(&self, service: &str, node: &Node) -> Result<()>;

    /// Remove `node` from `service`.
    ///
    /// The node leaves the membership list immediately in both modes. When the
    /// last node leaves, `graceful` keeps the service as an empty entry
    /// (an `Updated` event with no nodes, letting clients drain), while a
    /// forced removal deletes the service (a `Deleted` event).
    async fn unregister(&self, service: &str, node: &Node, graceful: bool) -> Result<()>;

    /// Point-in-time read of one service.
    async fn discover(&self, service: &str) -> Result<Service>;

    /// Full registry snapshot.
    async fn load_all(&self) -> Result<Vec<Service>>;

    /// Append a change observer.
    fn on_updated(&self, callback: UpdateCallback) -> WatchId;

    /// Detach an observer added with [`Registry::on_updated`].
    fn remove_watch(&self, id: WatchId) -> bool;
}

/// Run `fut` with a deadline, mapping expiry to [`DiscoveryError::Timeout`].
pub async fn within<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(DiscoveryError::Timeout(deadline)),
    }
}
