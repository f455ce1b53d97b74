//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Settings (validated, immutable)
//!     → shared via Arc<ArcSwap<Settings>> to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the shared snapshot
//!     → proxy polls and compares, health engine receives setters
//! ```
//!
//! # Design Decisions
//! - Config snapshots are immutable; a change is a whole new snapshot
//! - All fields have defaults to allow minimal configs
//! - Invalid reloads are logged and ignored

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BackendKind, CoordinatorConfig, DiscoveryProxyConfig, Environment, HealthConfig,
    ObservabilityConfig, Settings,
};
pub use watcher::{ConfigWatcher, SharedSettings};
