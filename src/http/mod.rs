//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → entry point live state (one snapshot per request)
//!     → handler.rs (router tree → middlewares → service)
//!     → Send response to client
//! ```

pub mod handler;
pub mod request;
pub mod server;

pub use handler::{Handler, SharedHandler};
pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
