//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track in-flight requests (for Least Connections LB)
//! - Rewrite request URIs towards the backend

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::uri::{Authority, PathAndQuery, Scheme, Uri};
use url::Url;

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// The configured URL of the backend.
    pub url: Url,
    /// Pre-calculated scheme and authority for URI rewriting.
    scheme: Scheme,
    authority: Authority,
    /// Weight for weighted load balancing.
    pub weight: u32,
    /// Number of currently in-flight requests.
    pub active_connections: AtomicUsize,
}

impl Backend {
    /// Create a new backend from its URL.
    pub fn new(url: Url, weight: u32) -> Result<Self, axum::http::Error> {
        let scheme = Scheme::try_from(url.scheme())?;
        let host = url.host_str().unwrap_or_default();
        let authority = match url.port() {
            Some(port) => Authority::try_from(format!("{}:{}", host, port).as_str())?,
            None => Authority::try_from(host)?,
        };
        Ok(Self {
            url,
            scheme,
            authority,
            weight,
            active_connections: AtomicUsize::new(0),
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Get the current number of in-flight requests.
    pub fn active_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment in-flight request count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement in-flight request count.
    pub fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Track one in-flight request until the guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> BackendConnectionGuard {
        self.inc_connections();
        BackendConnectionGuard {
            backend: self.clone(),
        }
    }

    /// Point `uri` at this backend, keeping its path and query.
    pub fn rewrite_uri(&self, uri: &Uri) -> Result<Uri, axum::http::Error> {
        let path_and_query = uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?;
        Ok(uri)
    }
}

/// A RAII guard that manages the in-flight request count.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    pub backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.dec_connections();
    }
}
