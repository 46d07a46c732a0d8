//! Hot swap file watcher for units
//!
//! Watches unit directories for changes and drives the registry: new or
//! modified files are loaded (replacing the running unit when the file
//! carries a newer version), deleted files are unloaded.

use crate::{HubError, Hubs};
use async_trait::async_trait;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use plughub_api::{Unit, UnitError, UnitId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Turns files into units
///
/// Implemented by backends that keep their units on disk, such as a
/// script backend reading source files.
#[async_trait]
pub trait UnitSource: Send + Sync + 'static {
    /// File extension handled by this source, without the dot
    fn extension(&self) -> &str;

    /// Build a unit from the file at `path`
    async fn load(&self, path: &Path) -> Result<Arc<dyn Unit>, UnitError>;
}

/// Configuration for the hot swap watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for file events
    pub debounce: Duration,
    /// Whether to load existing units on start
    pub load_existing: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            load_existing: true,
        }
    }
}

/// Which unit each watched file provided
type Tracked = HashMap<PathBuf, UnitId>;

/// Hot swap watcher for unit directories
pub struct HotSwapWatcher {
    hubs: Hubs,
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

impl HotSwapWatcher {
    /// Create a new watcher for the given directories
    pub async fn new(
        hubs: Hubs,
        source: Arc<dyn UnitSource>,
        directories: impl IntoIterator<Item = impl AsRef<Path>>,
        config: WatcherConfig,
    ) -> Result<Self, WatcherError> {
        let directories: Vec<PathBuf> = directories
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();

        let mut tracked = Tracked::new();
        if config.load_existing {
            for dir in &directories {
                if dir.is_dir() {
                    Self::load_directory(&hubs, source.as_ref(), dir, &mut tracked).await?;
                }
            }
        }

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let _ = event_tx.blocking_send(event);
                }
                Err(e) => tracing::warn!(error = %e, "File watch error"),
            }
        })
        .map_err(WatcherError::WatcherInit)?;

        for dir in &directories {
            if dir.exists() {
                watcher
                    .watch(dir, RecursiveMode::NonRecursive)
                    .map_err(WatcherError::WatcherInit)?;
                tracing::info!(dir = %dir.display(), "Watching directory for units");
            } else {
                tracing::warn!(dir = %dir.display(), "Directory does not exist, skipping");
            }
        }

        let task_hubs = hubs.clone();
        let debounce = config.debounce;
        tokio::spawn(async move {
            let mut pending: Vec<PathBuf> = Vec::new();
            let mut deadline: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Hot swap watcher shutting down");
                        break;
                    }

                    Some(event) = event_rx.recv() => {
                        for path in event.paths {
                            if Self::is_unit_file(source.as_ref(), &path) && !pending.contains(&path) {
                                pending.push(path);
                            }
                        }
                        if !pending.is_empty() {
                            deadline = Some(tokio::time::Instant::now() + debounce);
                        }
                    }

                    _ = async {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        for path in pending.drain(..) {
                            Self::handle_file_change(&task_hubs, source.as_ref(), &path, &mut tracked).await;
                        }
                        deadline = None;
                    }
                }
            }
        });

        Ok(Self {
            hubs,
            _watcher: watcher,
            shutdown_tx,
        })
    }

    /// Load every unit file in a directory
    async fn load_directory(
        hubs: &Hubs,
        source: &dyn UnitSource,
        dir: &Path,
        tracked: &mut Tracked,
    ) -> Result<(), WatcherError> {
        let entries = std::fs::read_dir(dir).map_err(|source| WatcherError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if Self::is_unit_file(source, &path) {
                Self::handle_file_change(hubs, source, &path, tracked).await;
            }
        }

        Ok(())
    }

    /// Load, swap or unload the unit behind `path`
    async fn handle_file_change(
        hubs: &Hubs,
        source: &dyn UnitSource,
        path: &Path,
        tracked: &mut Tracked,
    ) {
        if !path.exists() {
            if let Some(id) = tracked.remove(path) {
                match hubs.unload_plugin(id.as_str()).await {
                    Ok(()) => {
                        tracing::info!(unit = %id, path = %path.display(), "Unit unloaded (file deleted)")
                    }
                    Err(e) => {
                        tracing::warn!(unit = %id, path = %path.display(), error = %e, "Failed to unload unit")
                    }
                }
            }
            return;
        }

        let unit = match source.load(path).await {
            Ok(unit) => unit,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read unit");
                return;
            }
        };
        let id = unit.id().clone();

        match hubs.load_plugin(unit).await {
            Ok(()) => {
                tracing::info!(unit = %id, path = %path.display(), "Unit loaded from file");
                if let Some(old) = tracked.insert(path.to_path_buf(), id.clone()) {
                    if old != id {
                        // The file now provides a different unit
                        if let Err(e) = hubs.unload_plugin(old.as_str()).await {
                            tracing::warn!(unit = %old, error = %e, "Failed to unload replaced unit");
                        }
                    }
                }
            }
            Err(HubError::Version { loaded, offered, .. }) => {
                tracing::debug!(unit = %id, %loaded, %offered, "File change ignored, version not newer");
            }
            Err(e) => {
                tracing::warn!(unit = %id, path = %path.display(), error = %e, "Failed to load unit");
            }
        }
    }

    fn is_unit_file(source: &dyn UnitSource, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext == source.extension())
            .unwrap_or(false)
    }

    /// Get a reference to the registry
    pub fn hubs(&self) -> &Hubs {
        &self.hubs
    }

    /// Shutdown the watcher
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Errors that can occur during watching
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    #[error("Failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
