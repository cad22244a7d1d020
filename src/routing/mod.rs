//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, method, headers)
//!     → router.rs (RouterTree lookup, highest priority first)
//!     → matcher.rs (evaluate match conditions)
//!     → matched route's middleware chain → service, or 404
//!
//! Route Compilation (every reload cycle):
//!     RouterConfig[] for one entry point
//!     → rule.rs (parse rule into matchers)
//!     → resolve service + middlewares through the cycle registries
//!     → sort by priority, freeze as immutable RouterTree
//! ```
//!
//! # Design Decisions
//! - Routes compiled per reload, immutable while serving
//! - No regex in hot path (exact / prefix matching only)
//! - Deterministic: priority, then router name
//! - First match wins

pub mod matcher;
pub mod router;
pub mod rule;

pub use router::{CompileError, CompiledEntryPoint, Route, RouterCompiler, RouterTree};
