//! Switchyard: a reverse proxy whose routing is rebuilt live from provider
//! configuration.
//!
//! Providers push [`config::Message`]s; the [`server::Server`] throttles them,
//! compiles every entry point's router tree, middleware chains, load-balanced
//! services and TLS certificates, and swaps the result in atomically.

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;
pub mod server;

// Traffic management
pub mod load_balancer;
pub mod middleware;
pub mod tls;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::StaticConfiguration;
pub use lifecycle::Shutdown;
pub use server::Server;
