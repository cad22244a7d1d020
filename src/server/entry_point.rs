//! Entry points and their live, atomically swapped state.
//!
//! Each entry point owns one `ArcSwap<EntryPointState>`. A reload publishes a
//! whole new state (handler and certificates together) with a single store;
//! requests and TLS handshakes load one snapshot and keep it to completion.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::config::EntryPointConfig;
use crate::http::handler::{NotFound, SharedHandler};
use crate::tls::CertificateStore;

/// What an entry point serves between two reloads.
pub struct EntryPointState {
    /// Reload cycle that produced this state; 0 before the first one.
    pub version: u64,
    pub handler: SharedHandler,
    pub certificates: Arc<CertificateStore>,
}

impl EntryPointState {
    /// State before any configuration has been applied: 404 everywhere.
    pub fn empty() -> Self {
        Self {
            version: 0,
            handler: Arc::new(NotFound),
            certificates: Arc::new(CertificateStore::new()),
        }
    }
}

impl fmt::Debug for EntryPointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPointState")
            .field("version", &self.version)
            .field("certificates", &self.certificates.len())
            .finish()
    }
}

#[derive(Debug)]
pub struct EntryPoint {
    name: String,
    config: EntryPointConfig,
    state: Arc<ArcSwap<EntryPointState>>,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>, config: EntryPointConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(ArcSwap::from_pointee(EntryPointState::empty())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EntryPointConfig {
        &self.config
    }

    pub fn is_tls(&self) -> bool {
        self.config.tls
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<EntryPointState> {
        self.state.load_full()
    }

    /// Replace the live state.
    pub fn publish(&self, state: EntryPointState) {
        tracing::debug!(
            entry_point = %self.name,
            version = state.version,
            certificates = state.certificates.len(),
            "Entry point state published"
        );
        self.state.store(Arc::new(state));
    }

    /// Tower service dispatching to the live handler.
    pub fn service(&self) -> EntryPointService {
        EntryPointService {
            state: Arc::clone(&self.state),
        }
    }

    /// rustls resolver reading the live certificate store.
    pub fn resolver(&self) -> Arc<LiveCertificates> {
        Arc::new(LiveCertificates {
            entry_point: self.name.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Clone)]
pub struct EntryPointService {
    state: Arc<ArcSwap<EntryPointState>>,
}

impl tower::Service<Request<Body>> for EntryPointService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let snapshot = self.state.load_full();
        let response = snapshot.handler.call(req);
        Box::pin(async move {
            let response = response.await;
            drop(snapshot);
            Ok(response)
        })
    }
}

pub struct LiveCertificates {
    entry_point: String,
    state: Arc<ArcSwap<EntryPointState>>,
}

impl fmt::Debug for LiveCertificates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCertificates")
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

impl ResolvesServerCert for LiveCertificates {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let state = self.state.load();
        let server_name = client_hello.server_name();
        match state.certificates.resolve_sni(server_name) {
            Some(certificate) => Some(certificate.certified_key()),
            None => {
                tracing::debug!(
                    entry_point = %self.entry_point,
                    server_name = ?server_name,
                    "No certificate for TLS handshake"
                );
                None
            }
        }
    }
}
