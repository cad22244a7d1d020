//! Turns a `Configurations` snapshot into per-entry-point handlers and
//! certificates.
//!
//! # Steps
//! 1. Merge every provider's configuration
//! 2. Assign routers to entry points (explicit list, else the defaults)
//! 3. Compile each entry point through the cycle's service / middleware arenas
//! 4. Assign certificates (explicit list, else every TLS entry point and every
//!    entry point with a valid TLS router)
//!
//! Loading never touches live state; the caller publishes the result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::dynamic::{merge, CertificateConfig, Configurations, DynamicConfiguration, RouterConfig};
use crate::config::StaticConfiguration;
use crate::http::handler::SharedHandler;
use crate::load_balancer::registry::{ServiceArena, ServiceRegistry};
use crate::load_balancer::HttpClient;
use crate::middleware::registry::MiddlewareRegistry;
use crate::routing::router::RouterCompiler;
use crate::tls::{Certificate, CertificateError};

/// Output of one compilation cycle.
pub struct LoadedConfig {
    /// One handler per declared entry point.
    pub handlers: BTreeMap<String, SharedHandler>,
    /// Certificates per entry point. Entry points without any are absent.
    pub certificates: BTreeMap<String, Vec<Arc<Certificate>>>,
    /// Services built (or carried over) by this cycle.
    pub services: ServiceArena,
}

impl std::fmt::Debug for LoadedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedConfig")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("certificates", &self.certificates)
            .field("services", &self.services.len())
            .finish()
    }
}

type RouterRef<'a> = (&'a String, &'a RouterConfig);

pub struct ConfigurationApplier {
    config: Arc<StaticConfiguration>,
    client: HttpClient,
}

impl ConfigurationApplier {
    pub fn new(config: Arc<StaticConfiguration>, client: HttpClient) -> Self {
        Self { config, client }
    }

    pub fn static_config(&self) -> &StaticConfiguration {
        &self.config
    }

    /// Compile a snapshot. `previous` lets unchanged services keep their state.
    pub fn load_config(
        &self,
        configurations: &Configurations,
        previous: Option<&ServiceArena>,
    ) -> LoadedConfig {
        let merged = merge(configurations);
        let assignments = self.assign_routers(&merged);

        let mut services = ServiceRegistry::new(self.client.clone(), previous);
        let mut middlewares = MiddlewareRegistry::new();
        let mut handlers: BTreeMap<String, SharedHandler> = BTreeMap::new();
        let mut tls_targets = BTreeSet::new();

        {
            let mut compiler = RouterCompiler::new(&merged, &mut services, &mut middlewares);
            for name in self.config.entry_points.keys() {
                let routers = assignments.get(name).cloned().unwrap_or_default();
                let compiled = compiler.compile(name, routers);
                if compiled.tls_requested {
                    tls_targets.insert(name.clone());
                }
                handlers.insert(name.clone(), Arc::new(compiled.tree));
            }
        }

        let certificates = self.assign_certificates(&merged.tls, &tls_targets);
        let services = services.into_arena();

        tracing::debug!(
            providers = configurations.len(),
            routers = merged.routers.len(),
            services = services.len(),
            middlewares = middlewares.len(),
            "Configuration loaded"
        );

        LoadedConfig {
            handlers,
            certificates,
            services,
        }
    }

    /// Routers per entry point name.
    fn assign_routers<'a>(&self, merged: &'a DynamicConfiguration) -> BTreeMap<String, Vec<RouterRef<'a>>> {
        let mut assignments: BTreeMap<String, Vec<RouterRef<'a>>> = BTreeMap::new();

        for (name, router) in &merged.routers {
            let targets = if router.entry_points.is_empty() {
                &self.config.default_entry_points
            } else {
                &router.entry_points
            };
            if targets.is_empty() {
                tracing::warn!(router = %name, "Router has no entry points and no defaults are set, skipping");
                continue;
            }
            for target in targets {
                if self.config.entry_points.contains_key(target) {
                    assignments
                        .entry(target.clone())
                        .or_default()
                        .push((name, router));
                } else {
                    tracing::warn!(router = %name, entry_point = %target, "Router references an undefined entry point");
                }
            }
        }

        assignments
    }

    fn assign_certificates(
        &self,
        configs: &[CertificateConfig],
        tls_targets: &BTreeSet<String>,
    ) -> BTreeMap<String, Vec<Arc<Certificate>>> {
        let implicit: Vec<&String> = self
            .config
            .entry_points
            .iter()
            .filter(|(name, ep)| ep.tls || tls_targets.contains(*name))
            .map(|(name, _)| name)
            .collect();

        let mut assigned: BTreeMap<String, Vec<Arc<Certificate>>> = BTreeMap::new();

        for (index, config) in configs.iter().enumerate() {
            let certificate = match Certificate::from_config(config) {
                Ok(certificate) => Arc::new(certificate),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping invalid certificate");
                    continue;
                }
            };

            if config.entry_points.is_empty() {
                for name in &implicit {
                    assigned
                        .entry((*name).clone())
                        .or_default()
                        .push(Arc::clone(&certificate));
                }
                continue;
            }

            for name in &config.entry_points {
                if self.config.entry_points.contains_key(name) {
                    assigned
                        .entry(name.clone())
                        .or_default()
                        .push(Arc::clone(&certificate));
                } else {
                    tracing::warn!(index, entry_point = %name, "Certificate references an undefined entry point");
                }
            }
        }

        for name in self.config.tls_entry_points() {
            if assigned.get(name).map_or(true, Vec::is_empty) {
                let error = CertificateError::EmptyStore(name.clone());
                tracing::warn!(entry_point = %name, error = %error, "TLS entry point has no certificate");
            }
        }

        assigned
    }
}
