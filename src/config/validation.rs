//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics and reports every
//! problem at once.

use thiserror::Error;

use crate::config::schema::{BackendKind, Settings};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("discovery_proxy.connection cannot be 'proxy'")]
    ProxyWrapsProxy,

    #[error("discovery_proxy.dir must not be empty")]
    EmptyCacheDir,

    #[error("coordinator.endpoints must not be empty for backend '{0}'")]
    NoEndpoints(BackendKind),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("the {0} role needs a shared backend; 'memory' lives only inside this process")]
    InProcessBackend(&'static str),
}

/// The backend that ultimately holds membership: the proxy's wrapped
/// connection, or the discovery backend itself.
fn membership_backend(settings: &Settings) -> BackendKind {
    if settings.discovery == BackendKind::Proxy {
        settings.discovery_proxy.connection
    } else {
        settings.discovery
    }
}

/// Reject settings a standalone daemon `role` cannot serve.
///
/// A daemon sees only its own process, so an in-memory membership would
/// always be empty to it.
pub fn validate_daemon_backend(settings: &Settings, role: &'static str) -> Result<(), ValidationError> {
    if membership_backend(settings) == BackendKind::Memory {
        return Err(ValidationError::InProcessBackend(role));
    }
    Ok(())
}

/// Validate a parsed configuration.
pub fn validate_config(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let uses_proxy = settings.discovery == BackendKind::Proxy;
    if uses_proxy {
        if settings.discovery_proxy.connection == BackendKind::Proxy {
            errors.push(ValidationError::ProxyWrapsProxy);
        }
        if settings.discovery_proxy.dir.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyCacheDir);
        }
        if settings.discovery_proxy.poll_interval_ms == 0 {
            errors.push(ValidationError::Zero("discovery_proxy.poll_interval_ms"));
        }
    }

    let remote = membership_backend(settings);
    if remote == BackendKind::Etcd && settings.coordinator.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints(remote));
    }

    if settings.health.attempts == 0 {
        errors.push(ValidationError::Zero("health.attempts"));
    }
    if settings.health.probe_timeout_ms == 0 {
        errors.push(ValidationError::Zero("health.probe_timeout_ms"));
    }
    if settings.health.resize_tick_ms == 0 {
        errors.push(ValidationError::Zero("health.resize_tick_ms"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
