//! File provider: publishes a dynamic configuration file and watches it for changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::dynamic::Message;
use crate::config::loader::{load_dynamic, ConfigError};
use crate::config::schema::FileProviderConfig;

/// Provider name used in [`Message::provider_name`].
pub const FILE_PROVIDER: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("initial load failed: {0}")]
    Load(#[from] ConfigError),

    #[error("watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("server stopped accepting configurations")]
    Closed,
}

/// Reads a dynamic configuration file and pushes it to the server.
pub struct FileProvider {
    path: PathBuf,
    watch: bool,
    tx: mpsc::Sender<Message>,
}

impl FileProvider {
    /// Create a new file provider publishing into `tx`.
    pub fn new(config: &FileProviderConfig, tx: mpsc::Sender<Message>) -> Self {
        Self {
            path: config.path.clone(),
            watch: config.watch,
            tx,
        }
    }

    /// Publish the current file content, then start watching it if enabled.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub async fn provide(self) -> Result<Option<RecommendedWatcher>, ProviderError> {
        let configuration = load_dynamic(&self.path)?;
        self.tx
            .send(Message::new(FILE_PROVIDER, configuration))
            .await
            .map_err(|_| ProviderError::Closed)?;

        tracing::info!(path = ?self.path, "File provider loaded configuration");

        if !self.watch {
            return Ok(None);
        }
        self.run().map(Some)
    }

    /// Start watching the file in a background thread.
    fn run(self) -> Result<RecommendedWatcher, ProviderError> {
        let tx = self.tx.clone();
        let path = self.path.clone();
        // Editors often replace the file, so watch the directory and filter by name.
        let watch_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    if !event.paths.iter().any(|p| p.file_name() == path.file_name()) {
                        return;
                    }
                    tracing::info!(path = ?path, "Configuration file change detected");
                    match load_dynamic(&path) {
                        Ok(configuration) => {
                            if tx
                                .blocking_send(Message::new(FILE_PROVIDER, configuration))
                                .is_err()
                            {
                                tracing::debug!("Server gone, dropping file provider update");
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                "Failed to reload configuration file. Keeping current configuration."
                            );
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "File provider watching for changes");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn publishes_initial_configuration() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
            [routers.r]
            rule = "PathPrefix(`/`)"
            service = "s"
            "#
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let provider = FileProvider::new(
            &FileProviderConfig {
                path: file.path().to_path_buf(),
                watch: false,
            },
            tx,
        );

        let watcher = provider.provide().await.unwrap();
        assert!(watcher.is_none());

        let message = rx.recv().await.unwrap();
        assert_eq!(message.provider_name, FILE_PROVIDER);
        assert_eq!(message.configuration.routers["r"].service, "s");
    }

    #[tokio::test]
    async fn broken_file_fails_initial_load() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "routers = 42").unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let provider = FileProvider::new(
            &FileProviderConfig {
                path: file.path().to_path_buf(),
                watch: false,
            },
            tx,
        );

        assert!(matches!(
            provider.provide().await,
            Err(ProviderError::Load(_))
        ));
    }
}
