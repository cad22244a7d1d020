//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! static config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → StaticConfiguration (validated, immutable for the process lifetime)
//!
//! dynamic config (one per provider)
//!     → watcher.rs (file provider) or any other Message sender
//!     → Message { provider_name, configuration }
//!     → dynamic.rs merge() at reload time
//! ```
//!
//! # Design Decisions
//! - Static config is immutable once loaded; entry points never change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Dynamic config is plain data; compilation lives in `server::applier`

pub mod dynamic;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use dynamic::{
    CertificateConfig, Configurations, DynamicConfiguration, MiddlewareConfig, Message,
    RouterConfig, ServiceConfig,
};
pub use schema::{EntryPointConfig, StaticConfiguration};
