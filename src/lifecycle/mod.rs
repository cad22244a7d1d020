//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Stop requested → providers, throttle and listeners observe it → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, drain in-flight requests, close
//! - A reload already being applied completes and is published; throttled
//!   values still pending are dropped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
