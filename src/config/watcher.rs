//! Configuration file watcher for hot reload.
//!
//! Watches the directory containing the config file rather than the file
//! itself: editors that save by rename would otherwise detach the watch.
//! Only events touching the config file trigger a reload, and a reload whose
//! file contents are unchanged is skipped.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use crate::client::ServiceClient;
use crate::config::loader::parse_config;
use crate::config::schema::ClientConfig;

/// Watches a config file and yields validated configurations on change.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ClientConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of the update channel.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ClientConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (Self { path: path.to_path_buf(), updates }, rx)
    }

    /// Start watching. The returned handle must be kept alive for as long as
    /// updates are wanted.
    pub fn start(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let path = self.path.clone();
        let updates = self.updates;
        let last_seen: Arc<Mutex<Option<String>>> =
            Arc::new(Mutex::new(std::fs::read_to_string(&path).ok()));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                let touches_config = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !touches_config {
                    return;
                }

                let content = match std::fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Config file unreadable, keeping current configuration");
                        return;
                    }
                };
                {
                    let mut last = last_seen.lock().expect("config watcher mutex poisoned");
                    if last.as_deref() == Some(content.as_str()) {
                        return;
                    }
                    *last = Some(content.clone());
                }

                match parse_config(&content) {
                    Ok(config) => {
                        tracing::info!(path = ?path, "Config change detected");
                        let _ = updates.send(config);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected config change, keeping current configuration");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply configuration updates to `client` until the channel closes or the
/// shutdown signal fires.
pub async fn apply_updates(
    client: Arc<ServiceClient>,
    mut updates: mpsc::UnboundedReceiver<ClientConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    if let Err(e) = client.reload(config) {
                        tracing::error!(error = %e, "Failed to apply config change");
                    }
                }
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Config update loop stopped");
}
