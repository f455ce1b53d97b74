//! Client-side name resolution.
//!
//! # Data Flow
//! ```text
//! Client dials "scheme:///orders"
//!     → builder.rs (discover, push initial set, register resolver)
//!     → conn.rs (AddressBook swaps its address set, picks round-robin)
//!
//! Backend change event
//!     → builder.rs fan-out (read lock) → every resolver of that service
//!     → resolve.rs update_srv_cfg → conn.rs update_state
//!
//! Client hits a dead address
//!     → resolve.rs resolve_now → discover → update_state
//! ```
//!
//! # Design Decisions
//! - Resolvers for one service see snapshots in backend delivery order
//! - No ordering between watch pushes and resolve_now (last write wins)
//! - Closing the last resolver of a service removes the entry

pub mod builder;
pub mod conn;
pub mod resolve;
pub mod round_robin;
pub mod target;

pub use builder::Builder;
pub use conn::{AddressBook, ClientConn, LbPolicy, ResolvedState};
pub use resolve::Resolver;
pub use target::Target;
