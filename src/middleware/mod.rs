//! Router middlewares.
//!
//! # Data Flow
//! ```text
//! MiddlewareConfig (closed enum)
//!     → registry.rs (one instance per name per cycle)
//!     → Middleware::wrap(next) → Chained handler
//!         - basic_auth.rs (401 on missing / wrong credentials)
//!         - rate_limit.rs (429 when the client's bucket is empty)
//!         - headers.rs (rewrite request / response headers)
//!         - strip_prefix.rs (trim the matched prefix from the path)
//! ```
//!
//! # Design Decisions
//! - Configuration is validated when the middleware is built, never per request
//! - Per-middleware state (token buckets) lives in the instance, so every
//!   router sharing the middleware shares the state

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use thiserror::Error;

use crate::config::dynamic::MiddlewareConfig;
use crate::http::handler::{Handler, ResponseFuture, SharedHandler};

pub mod basic_auth;
pub mod headers;
pub mod rate_limit;
pub mod registry;
pub mod strip_prefix;

use basic_auth::BasicAuth;
use headers::Headers;
use rate_limit::RateLimit;
use strip_prefix::StripPrefix;

#[derive(Debug, Error, PartialEq)]
pub enum MiddlewareError {
    #[error("basic auth requires at least one user")]
    NoUsers,

    #[error("invalid user entry `{0}` (expected user:password)")]
    InvalidUser(String),

    #[error("rate limit burst must be at least 1")]
    InvalidBurst,

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("strip prefix requires at least one prefix starting with '/'")]
    InvalidPrefixes,
}

/// A built middleware.
#[derive(Debug)]
pub enum Middleware {
    BasicAuth(BasicAuth),
    RateLimit(RateLimit),
    Headers(Headers),
    StripPrefix(StripPrefix),
}

impl Middleware {
    pub fn build(name: &str, config: &MiddlewareConfig) -> Result<Self, MiddlewareError> {
        let middleware = match config {
            MiddlewareConfig::BasicAuth(c) => Middleware::BasicAuth(BasicAuth::new(c)?),
            MiddlewareConfig::RateLimit(c) => Middleware::RateLimit(RateLimit::new(name, c)?),
            MiddlewareConfig::Headers(c) => Middleware::Headers(Headers::new(c)?),
            MiddlewareConfig::StripPrefix(c) => Middleware::StripPrefix(StripPrefix::new(c)?),
        };
        tracing::debug!(middleware = %name, kind = config.kind(), "Middleware built");
        Ok(middleware)
    }

    /// Put this middleware in front of `next`.
    pub fn wrap(self: &Arc<Self>, next: SharedHandler) -> SharedHandler {
        Arc::new(Chained {
            middleware: Arc::clone(self),
            next,
        })
    }
}

struct Chained {
    middleware: Arc<Middleware>,
    next: SharedHandler,
}

impl Handler for Chained {
    fn call(&self, req: Request<Body>) -> ResponseFuture {
        match self.middleware.as_ref() {
            Middleware::BasicAuth(m) => m.handle(req, &self.next),
            Middleware::RateLimit(m) => m.handle(req, &self.next),
            Middleware::Headers(m) => m.handle(req, &self.next),
            Middleware::StripPrefix(m) => m.handle(req, &self.next),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::config::dynamic::StripPrefixConfig;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn wrap_runs_middleware_before_next() {
        let middleware = Arc::new(
            Middleware::build(
                "strip",
                &MiddlewareConfig::StripPrefix(StripPrefixConfig {
                    prefixes: vec!["/api".into()],
                }),
            )
            .unwrap(),
        );
        let handler = middleware.wrap(echo_path());
        let res = handler
            .call(Request::builder().uri("/api/users?x=1").body(Body::empty()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_string(res).await, "/users?x=1");
    }

    #[test]
    fn build_rejects_invalid_config() {
        let err = Middleware::build(
            "strip",
            &MiddlewareConfig::StripPrefix(StripPrefixConfig { prefixes: vec![] }),
        )
        .unwrap_err();
        assert_eq!(err, MiddlewareError::InvalidPrefixes);
    }
}
