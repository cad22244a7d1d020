//! The reloadable server.
//!
//! # Data Flow
//! ```text
//! providers ──Message──▶ aggregator ──Arc<Configurations>──▶ throttle.rs
//!                         (latest per provider,                │ at most one per window
//!                          unchanged skipped)                  ▼
//!                                                       apply loop
//!                                        spawn_blocking(applier.rs load_config)
//!                                                              │
//!                                   one ArcSwap store per entry point (entry_point.rs)
//!                                                              │
//!                     listeners (axum / axum-server + rustls) read the live state
//! ```
//!
//! # Design Decisions
//! - Reloads are applied one at a time, in the order the throttle emits them
//! - Compilation runs on the blocking pool; request serving never waits on it
//! - A failed reload keeps the previous state live
//! - Services whose configuration is unchanged keep their balancing state

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};

use crate::config::{Configurations, Message, StaticConfiguration};
use crate::http::handler::{NotFound, SharedHandler};
use crate::http::server::{build_app, serve_plain, serve_tls};
use crate::lifecycle::Shutdown;
use crate::load_balancer::registry::ServiceArena;
use crate::load_balancer::{http_client, HttpClient};
use crate::observability::metrics;
use crate::tls;

pub mod applier;
pub mod entry_point;
pub mod throttle;

pub use applier::{ConfigurationApplier, LoadedConfig};
pub use entry_point::{EntryPoint, EntryPointState};
pub use throttle::{ThrottleError, ThrottleReloader};

/// Buffer between providers and the aggregator.
const PROVIDER_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Throttle(#[from] ThrottleError),

    #[error("failed to bind entry point `{name}` on {address}: {source}")]
    Bind {
        name: String,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to set up TLS for entry point `{name}`: {source}")]
    Tls {
        name: String,
        #[source]
        source: rustls::Error,
    },

    #[error("server already started")]
    AlreadyStarted,

    #[error("configuration reload aborted: {0}")]
    Reload(#[from] JoinError),
}

/// What is currently published.
#[derive(Default)]
struct LiveConfig {
    version: u64,
    configurations: Option<Arc<Configurations>>,
    services: ServiceArena,
}

struct Core {
    applier: ConfigurationApplier,
    entry_points: BTreeMap<String, Arc<EntryPoint>>,
    live: Mutex<LiveConfig>,
    /// Held from the unchanged check to the publish, so reloads land in call order.
    reload: tokio::sync::Mutex<()>,
}

impl Core {
    fn previous_services(&self) -> ServiceArena {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .services
            .clone()
    }

    /// Compile and publish a snapshot. `Ok(None)` when it is already live.
    async fn apply(self: &Arc<Self>, configurations: Arc<Configurations>) -> Result<Option<u64>, ServerError> {
        let _reload = self.reload.lock().await;
        let previous = {
            let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            if live.configurations.as_deref() == Some(configurations.as_ref()) {
                return Ok(None);
            }
            live.services.clone()
        };

        let started = Instant::now();
        let core = Arc::clone(self);
        let snapshot = Arc::clone(&configurations);
        let loaded = tokio::task::spawn_blocking(move || {
            core.applier.load_config(&snapshot, Some(&previous))
        })
        .await
        .map_err(|e| {
            metrics::record_reload_failure();
            ServerError::Reload(e)
        })?;

        let version = self.publish(loaded, configurations);
        metrics::record_reload(version, started.elapsed());
        Ok(Some(version))
    }

    fn publish(&self, mut loaded: LoadedConfig, configurations: Arc<Configurations>) -> u64 {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.version += 1;
        let version = live.version;

        for (name, entry_point) in &self.entry_points {
            let handler: SharedHandler = loaded
                .handlers
                .remove(name)
                .unwrap_or_else(|| Arc::new(NotFound));
            let certificates = loaded.certificates.remove(name).unwrap_or_default();
            entry_point.publish(EntryPointState {
                version,
                handler,
                certificates: Arc::new(certificates.into_iter().collect()),
            });
        }

        live.services = loaded.services;
        live.configurations = Some(configurations);
        version
    }
}

/// Owns the entry points and runs the reload pipeline.
pub struct Server {
    core: Arc<Core>,
    provider_tx: mpsc::Sender<Message>,
    provider_rx: Option<mpsc::Receiver<Message>>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: StaticConfiguration) -> Self {
        Self::with_client(config, http_client())
    }

    /// Build a server forwarding through `client`.
    pub fn with_client(config: StaticConfiguration, client: HttpClient) -> Self {
        let config = Arc::new(config);
        let entry_points = config
            .entry_points
            .iter()
            .map(|(name, ep)| (name.clone(), Arc::new(EntryPoint::new(name.clone(), ep.clone()))))
            .collect();
        let (provider_tx, provider_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);

        Self {
            core: Arc::new(Core {
                applier: ConfigurationApplier::new(config, client),
                entry_points,
                live: Mutex::new(LiveConfig::default()),
                reload: tokio::sync::Mutex::new(()),
            }),
            provider_tx,
            provider_rx: Some(provider_rx),
            shutdown: Shutdown::new(),
            tasks: Vec::new(),
        }
    }

    pub fn static_config(&self) -> &StaticConfiguration {
        self.core.applier.static_config()
    }

    /// Channel on which providers publish their configuration.
    pub fn provider_sender(&self) -> mpsc::Sender<Message> {
        self.provider_tx.clone()
    }

    /// Stop signal shared with every server task.
    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn entry_point(&self, name: &str) -> Option<&Arc<EntryPoint>> {
        self.core.entry_points.get(name)
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &Arc<EntryPoint>> {
        self.core.entry_points.values()
    }

    /// Version of the live configuration; 0 before the first reload.
    pub fn version(&self) -> u64 {
        self.core
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Compile a snapshot against the live services without publishing it.
    pub fn load_config(&self, configurations: &Configurations) -> LoadedConfig {
        let previous = self.core.previous_services();
        self.core.applier.load_config(configurations, Some(&previous))
    }

    /// Compile and publish a snapshot now, bypassing the throttle.
    /// Returns the new version, or `None` if the snapshot is already live.
    pub async fn apply(&self, configurations: Configurations) -> Result<Option<u64>, ServerError> {
        self.core.apply(Arc::new(configurations)).await
    }

    /// Bind every entry point and start the reload pipeline.
    /// Returns the bound address of each entry point.
    pub async fn start(&mut self) -> Result<BTreeMap<String, SocketAddr>, ServerError> {
        let provider_rx = self.provider_rx.take().ok_or(ServerError::AlreadyStarted)?;

        let (snapshot_tx, snapshot_rx) = mpsc::channel(PROVIDER_CHANNEL_CAPACITY);
        let (reload_tx, reload_rx) = mpsc::channel(1);
        let throttle = ThrottleReloader::new(
            self.static_config().providers.throttle_duration(),
            snapshot_rx,
            reload_tx,
            self.shutdown.subscribe(),
        )?;

        let mut listeners = Vec::new();
        let mut addresses = BTreeMap::new();
        for entry_point in self.core.entry_points.values() {
            let listener = bind(entry_point)?;
            let address = listener.local_addr().map_err(|source| ServerError::Bind {
                name: entry_point.name().to_string(),
                address: entry_point.config().address.clone(),
                source,
            })?;
            let tls = if entry_point.is_tls() {
                let config = tls::server_config(entry_point.resolver()).map_err(|source| {
                    ServerError::Tls {
                        name: entry_point.name().to_string(),
                        source,
                    }
                })?;
                Some(RustlsConfig::from_config(Arc::new(config)))
            } else {
                None
            };
            addresses.insert(entry_point.name().to_string(), address);
            listeners.push((Arc::clone(entry_point), listener, tls));
        }

        self.tasks.push(tokio::spawn(aggregate(
            provider_rx,
            snapshot_tx,
            self.shutdown.subscribe(),
        )));
        self.tasks.push(tokio::spawn(throttle.run()));
        self.tasks
            .push(tokio::spawn(apply_loop(Arc::clone(&self.core), reload_rx)));

        for (entry_point, listener, tls) in listeners {
            let app = build_app(&entry_point);
            let stop = self.shutdown.subscribe();
            let name = entry_point.name().to_string();
            let task = match tls {
                Some(tls) => tokio::spawn(async move {
                    if let Err(e) = serve_tls(listener, app, tls, stop).await {
                        tracing::error!(entry_point = %name, error = %e, "Entry point failed");
                    }
                }),
                None => {
                    let listener = TcpListener::from_std(listener).map_err(|source| ServerError::Bind {
                        name: name.clone(),
                        address: entry_point.config().address.clone(),
                        source,
                    })?;
                    tokio::spawn(async move {
                        if let Err(e) = serve_plain(listener, app, stop).await {
                            tracing::error!(entry_point = %name, error = %e, "Entry point failed");
                        }
                    })
                }
            };
            self.tasks.push(task);
        }

        for (name, address) in &addresses {
            tracing::info!(entry_point = %name, address = %address, "Entry point listening");
        }
        Ok(addresses)
    }

    /// Ask every task to stop. Pending reloads are dropped.
    pub fn stop(&self) {
        tracing::info!("Stopping server");
        self.shutdown.trigger();
    }

    /// Stop and wait for every task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Server task failed");
            }
        }
        tracing::info!("Server stopped");
    }
}

fn bind(entry_point: &EntryPoint) -> Result<std::net::TcpListener, ServerError> {
    let address = &entry_point.config().address;
    let to_error = |source| ServerError::Bind {
        name: entry_point.name().to_string(),
        address: address.clone(),
        source,
    };
    let listener = std::net::TcpListener::bind(address.as_str()).map_err(to_error)?;
    listener.set_nonblocking(true).map_err(to_error)?;
    Ok(listener)
}

/// Keep the latest configuration of every provider and forward a snapshot on change.
async fn aggregate(
    mut providers: mpsc::Receiver<Message>,
    snapshots: mpsc::Sender<Arc<Configurations>>,
    mut stop: broadcast::Receiver<()>,
) {
    let mut configurations = Configurations::new();

    loop {
        let message = tokio::select! {
            biased;
            _ = stop.recv() => break,
            message = providers.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if configurations.get(&message.provider_name) == Some(&message.configuration) {
            tracing::debug!(provider = %message.provider_name, "Skipping unchanged configuration");
            continue;
        }

        tracing::info!(provider = %message.provider_name, "Configuration received");
        configurations.insert(message.provider_name, message.configuration);
        let snapshot = Arc::new(configurations.clone());

        tokio::select! {
            biased;
            _ = stop.recv() => break,
            sent = snapshots.send(snapshot) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Provider aggregation stopped");
}

/// Apply throttled snapshots one at a time.
async fn apply_loop(core: Arc<Core>, mut reloads: mpsc::Receiver<Arc<Configurations>>) {
    while let Some(configurations) = reloads.recv().await {
        match core.apply(configurations).await {
            Ok(Some(version)) => tracing::info!(version, "Configuration applied"),
            Ok(None) => tracing::debug!("Configuration already live"),
            Err(e) => tracing::error!(error = %e, "Reload failed, keeping the current configuration"),
        }
    }
    tracing::debug!("Apply loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dynamic::{DynamicConfiguration, RouterConfig};
    use crate::config::EntryPointConfig;

    fn server() -> Server {
        let mut config = StaticConfiguration::with_entry_points([("http", EntryPointConfig::plain("127.0.0.1:0"))]);
        config.default_entry_points = vec!["http".to_string()];
        Server::new(config)
    }

    fn snapshot(rule: &str) -> Arc<Configurations> {
        let mut configuration = DynamicConfiguration::default();
        configuration.routers.insert(
            "web".into(),
            RouterConfig {
                rule: rule.into(),
                service: "missing".into(),
                ..Default::default()
            },
        );
        Arc::new(Configurations::from([("file".to_string(), configuration)]))
    }

    #[tokio::test]
    async fn queued_reload_is_published_after_the_throttle_stops() {
        let server = server();
        let (tx, rx) = mpsc::channel(1);
        tx.send(snapshot("Path(`/a`)")).await.unwrap();
        // The throttle dropping its sender is how a stop reaches the apply loop.
        drop(tx);

        apply_loop(Arc::clone(&server.core), rx).await;
        assert_eq!(server.version(), 1);
        assert_eq!(server.entry_point("http").unwrap().state().version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_applies_publish_once() {
        let server = server();
        let core = &server.core;
        let results = futures_util::future::join_all(
            (0..8).map(|_| core.apply(snapshot("Path(`/same`)"))),
        )
        .await;

        let published: Vec<u64> = results
            .into_iter()
            .filter_map(|r| r.unwrap())
            .collect();
        assert_eq!(published, vec![1]);
        assert_eq!(server.version(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_applies_get_consecutive_versions() {
        let server = server();
        let core = &server.core;
        let results = futures_util::future::join_all(
            (0..8).map(|i| core.apply(snapshot(&format!("Path(`/v{}`)", i)))),
        )
        .await;

        let mut versions: Vec<u64> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<_>>());
        assert_eq!(server.entry_point("http").unwrap().state().version, 8);
    }
}
