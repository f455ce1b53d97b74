//! On-disk service mirror.
//!
//! One file per service at `{dir}/{service}.json` holding the JSON form of
//! [`Service`]. Every write goes to its own temporary file in `dir`, is
//! fsynced, then renamed over the target, so readers see either the old or
//! the new file and concurrent writers never share a temporary.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::discovery::types::validate_service_name;
use crate::discovery::{DiscoveryError, Result, Service};
use crate::observability::metrics;

const CACHE_EXTENSION: &str = "json";

/// Path of the cache file for `service`.
pub fn cache_file_path(dir: &Path, service: &str) -> Result<PathBuf> {
    validate_service_name(service).map_err(DiscoveryError::Configuration)?;
    Ok(dir.join(format!("{}.{}", service, CACHE_EXTENSION)))
}

/// Persist one service snapshot.
pub fn write_service(dir: &Path, service: &Service) -> Result<()> {
    let path = cache_file_path(dir, &service.name)?;
    fs::create_dir_all(dir)?;

    let encoded = serde_json::to_vec(service)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", service.name))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(&encoded)?;
    tmp.as_file().sync_all()?;
    persist(tmp, &path)?;
    sync_dir(dir);

    metrics::record_cache_write("write");
    tracing::debug!(service = %service.name, path = %path.display(), "Mirrored service to disk");
    Ok(())
}

/// Read one service snapshot.
pub fn read_service(dir: &Path, service: &str) -> Result<Service> {
    let path = cache_file_path(dir, service)?;
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(DiscoveryError::NotFound(service.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// Remove one service file. A missing file is not an error.
pub fn remove_service(dir: &Path, service: &str) -> Result<()> {
    let path = cache_file_path(dir, service)?;
    match fs::remove_file(&path) {
        Ok(()) => {
            metrics::record_cache_write("remove");
            tracing::debug!(service, path = %path.display(), "Removed service from disk mirror");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Every readable service in `dir`, sorted by name.
///
/// Unreadable or corrupt files are skipped with a warning.
pub fn load_all(dir: &Path) -> Result<Vec<Service>> {
    let mut services = Vec::new();
    for name in cached_names(dir)? {
        match read_service(dir, &name) {
            Ok(service) => services.push(service),
            Err(e) => tracing::warn!(service = %name, error = %e, "Skipping unreadable cache file"),
        }
    }
    services.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(services)
}

/// Remove files of services not in `keep`. Returns how many were removed.
///
/// Keeps going past files it cannot remove and reports them as a
/// [`DiscoveryError::PartialFailure`].
pub fn prune(dir: &Path, keep: &HashSet<&str>) -> Result<usize> {
    let stale: Vec<String> = cached_names(dir)?
        .into_iter()
        .filter(|name| !keep.contains(name.as_str()))
        .collect();

    let mut failed = 0;
    for name in &stale {
        if let Err(e) = remove_service(dir, name) {
            tracing::warn!(service = %name, error = %e, "Failed to prune cache file");
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(DiscoveryError::PartialFailure {
            failed,
            total: stale.len(),
        });
    }
    Ok(stale.len())
}

/// Write a full snapshot and drop files for services that disappeared.
///
/// Services named in `fresh` changed after the snapshot was taken: their
/// files are newer than the snapshot and are neither rewritten nor pruned.
/// Every service is attempted; failures are reported together as a
/// [`DiscoveryError::PartialFailure`].
pub fn mirror_snapshot(dir: &Path, services: &[Service], fresh: &HashSet<String>) -> Result<()> {
    let mut failed = 0;
    let mut total = 0;
    for service in services.iter().filter(|s| !fresh.contains(&s.name)) {
        total += 1;
        if let Err(e) = write_service(dir, service) {
            tracing::warn!(service = %service.name, error = %e, "Failed to mirror service");
            failed += 1;
        }
    }

    let keep: HashSet<&str> = services
        .iter()
        .map(|s| s.name.as_str())
        .chain(fresh.iter().map(String::as_str))
        .collect();
    match prune(dir, &keep) {
        Ok(0) => {}
        Ok(removed) => {
            total += removed;
            tracing::info!(removed, dir = %dir.display(), "Pruned stale cache files");
        }
        Err(DiscoveryError::PartialFailure {
            failed: prune_failed,
            total: prune_total,
        }) => {
            failed += prune_failed;
            total += prune_total;
        }
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to list cache files");
            failed += 1;
            total += 1;
        }
    }

    if failed > 0 {
        return Err(DiscoveryError::PartialFailure { failed, total });
    }
    Ok(())
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.persist(path).map_err(|e| DiscoveryError::Io(e.error))?;
    Ok(())
}

fn cached_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if !stem.starts_with('.') {
                names.push(stem.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "Directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
