//! Load-balanced service: a backend pool, its algorithm, and request forwarding.
//!
//! # Responsibilities
//! - Build the backend pool from a `ServiceConfig`
//! - Select a backend per request with the configured algorithm
//! - Forward the request and stream the backend response back

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;
use thiserror::Error;
use url::Url;

use crate::config::dynamic::{LoadBalancerMethod, ServiceConfig};
use crate::http::handler::{Handler, ResponseFuture, SharedHandler};
use crate::load_balancer::backend::{Backend, BackendConnectionGuard};
use crate::load_balancer::least_conn::LeastConnections;
use crate::load_balancer::round_robin::WeightedRoundRobin;
use crate::load_balancer::{HttpClient, LoadBalancer};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no servers configured")]
    NoServers,

    #[error("invalid server url `{url}`: {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("unsupported scheme `{0}` (only http backends are supported)")]
    UnsupportedScheme(String),
}

/// Hop-by-hop headers that must not be forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

/// A compiled service shared by every router that targets it.
#[derive(Debug)]
pub struct LoadBalancedService {
    name: String,
    config: ServiceConfig,
    backends: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
    client: HttpClient,
}

impl LoadBalancedService {
    /// Build the backend pool and algorithm state for a service.
    pub fn new(name: &str, config: &ServiceConfig, client: HttpClient) -> Result<Self, ServiceError> {
        let lb = &config.load_balancer;
        if lb.servers.is_empty() {
            return Err(ServiceError::NoServers);
        }

        let mut backends = Vec::with_capacity(lb.servers.len());
        for server in &lb.servers {
            let url = Url::parse(&server.url).map_err(|e| ServiceError::InvalidServerUrl {
                url: server.url.clone(),
                reason: e.to_string(),
            })?;
            if url.scheme() != "http" {
                return Err(ServiceError::UnsupportedScheme(url.scheme().to_string()));
            }
            let backend =
                Backend::new(url, server.weight).map_err(|e| ServiceError::InvalidServerUrl {
                    url: server.url.clone(),
                    reason: e.to_string(),
                })?;
            backends.push(Arc::new(backend));
        }

        let balancer: Box<dyn LoadBalancer> = match lb.method {
            LoadBalancerMethod::Wrr => Box::new(WeightedRoundRobin::new()),
            LoadBalancerMethod::LeastConn => Box::new(LeastConnections::new()),
        };

        tracing::debug!(
            service = %name,
            method = ?lb.method,
            backends = backends.len(),
            "Service built"
        );

        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            backends,
            balancer,
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration this instance was built from.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Select a backend for the next request.
    /// Returns a guard that decrements the in-flight count on drop.
    pub fn next_backend(&self) -> Option<BackendConnectionGuard> {
        self.balancer
            .next_server(&self.backends)
            .map(|backend| backend.acquire())
    }

    /// Expose this service as a request handler.
    pub fn handler(self: &Arc<Self>) -> SharedHandler {
        Arc::new(ServiceHandler {
            service: Arc::clone(self),
        })
    }

    /// Forward one request to the selected backend.
    pub async fn forward(&self, request: Request<Body>) -> Response {
        let backend = match self.next_backend() {
            Some(b) => b,
            None => {
                tracing::warn!(service = %self.name, "No backend available");
                return (StatusCode::SERVICE_UNAVAILABLE, "No available server").into_response();
            }
        };

        let (mut parts, body) = request.into_parts();

        parts.uri = match backend.rewrite_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(service = %self.name, error = %e, "Failed to rewrite request URI");
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        };

        for name in HOP_BY_HOP {
            parts.headers.remove(name);
        }

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            let forwarded = match parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
            {
                Some(prior) => format!("{}, {}", prior, addr.ip()),
                None => addr.ip().to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                parts.headers.insert("x-forwarded-for", value);
            }
        }

        if !self.config.load_balancer.pass_host_header {
            if let Ok(host) = HeaderValue::from_str(backend.authority().as_str()) {
                parts.headers.insert(header::HOST, host);
            }
        }

        let backend_addr = backend.authority().to_string();
        tracing::debug!(service = %self.name, backend = %backend_addr, uri = %parts.uri, "Forwarding request");

        let upstream: Result<hyper::Response<Incoming>, _> =
            self.client.request(Request::from_parts(parts, body)).await;
        match upstream {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::error!(
                    service = %self.name,
                    backend = %backend_addr,
                    error = %e,
                    "Upstream error"
                );
                metrics::record_upstream_error(&self.name);
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
        }
    }
}

struct ServiceHandler {
    service: Arc<LoadBalancedService>,
}

impl Handler for ServiceHandler {
    fn call(&self, req: Request<Body>) -> ResponseFuture {
        let service = Arc::clone(&self.service);
        Box::pin(async move { service.forward(req).await })
    }
}
