//! Client-side service discovery for RPC stacks.

pub mod config;
pub mod context;
pub mod discovery;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod resolver;

pub use config::schema::Settings;
pub use context::Suit;
pub use discovery::{DiscoveryError, Node, Registry, Service};
pub use lifecycle::Shutdown;
pub use resolver::Builder;
