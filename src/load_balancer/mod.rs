//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service handler
//!     → service.rs (LoadBalancedService: backend pool + algorithm)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (smooth weighted round robin)
//!         - least_conn.rs (pick backend with fewest in-flight requests)
//!     → backend.rs (connection guard, forward with the shared HTTP client)
//!
//! Compilation (every reload cycle):
//!     ServiceConfig
//!     → registry.rs (one instance per service name per cycle,
//!                    carried over from the previous cycle when unchanged)
//! ```
//!
//! # Design Decisions
//! - Algorithm state (cursor, weights) lives in the service instance, so every
//!   router sharing the instance shares the rotation
//! - Algorithm selection per service
//! - One HTTP client for the whole process; its connection pool outlives reloads

use std::sync::Arc;

use axum::body::Body;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

pub mod backend;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod service;

use backend::Backend;

/// Client used to forward requests to backends.
pub type HttpClient = Client<HttpConnector, Body>;

/// Build the forwarding client.
pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// A backend selection strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick the next backend, or `None` if the pool is empty.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
