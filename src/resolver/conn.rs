//! Client connection handle.
//!
//! # Responsibilities
//! - Define the extension point resolvers push address sets into
//! - Provide `AddressBook`, a handle whose address set is swapped atomically
//!   and which picks addresses round-robin for the client

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::resolver::round_robin::RoundRobin;

/// Load-balancing policy attached to every pushed address set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LbPolicy {
    #[default]
    RoundRobin,
}

impl LbPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            LbPolicy::RoundRobin => "round_robin",
        }
    }

    /// Service-config JSON understood by RPC client stacks.
    pub fn service_config(&self) -> String {
        format!(r#"{{"loadBalancingPolicy":"{}"}}"#, self.name())
    }
}

/// Complete resolution result for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedState {
    pub addresses: Vec<String>,
    pub lb_policy: LbPolicy,
}

/// Connection-side sink for resolver pushes.
///
/// Each call replaces the whole address set.
pub trait ClientConn: Send + Sync {
    fn update_state(&self, state: ResolvedState);
}

/// Connection handle holding the current address set.
#[derive(Debug, Default)]
pub struct AddressBook {
    state: ArcSwap<ResolvedState>,
    updates: AtomicU64,
    picker: RoundRobin,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; never a mix of two pushes.
    pub fn state(&self) -> Arc<ResolvedState> {
        self.state.load_full()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.state.load().addresses.clone()
    }

    /// Number of pushes received.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Pick the next address for a call.
    pub fn pick(&self) -> Option<String> {
        let state = self.state.load();
        self.picker.next_address(&state.addresses).map(str::to_string)
    }
}

impl ClientConn for AddressBook {
    fn update_state(&self, state: ResolvedState) {
        self.state.store(Arc::new(state));
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}
