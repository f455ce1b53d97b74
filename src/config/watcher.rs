//! Configuration file watcher for hot reload.

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::loader::load_config;
use crate::config::schema::Settings;

/// Live configuration shared by every subsystem.
pub type SharedSettings = Arc<ArcSwap<Settings>>;

/// Wrap an initial configuration for sharing.
pub fn shared(settings: Settings) -> SharedSettings {
    Arc::new(ArcSwap::from_pointee(settings))
}

/// A watcher that monitors the configuration file and swaps in valid reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    settings: SharedSettings,
}

impl ConfigWatcher {
    pub fn new(path: &Path, settings: SharedSettings) -> Self {
        Self {
            path: path.to_path_buf(),
            settings,
        }
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for reloads to continue.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let settings = self.settings.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        reload(&path, &settings);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Reload `path` into `settings`. Returns whether the snapshot was replaced.
pub fn reload(path: &Path, settings: &SharedSettings) -> bool {
    match load_config(path) {
        Ok(new_settings) => {
            settings.store(Arc::new(new_settings));
            true
        }
        Err(e) => {
            tracing::error!(
                "Failed to reload config: {}. Keeping current configuration.",
                e
            );
            false
        }
    }
}
