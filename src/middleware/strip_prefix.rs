//! Strip a path prefix before forwarding.
//!
//! The removed prefix is reported to the backend in `X-Forwarded-Prefix`.

use axum::body::Body;
use axum::http::uri::{PathAndQuery, Uri};
use axum::http::{HeaderValue, Request};

use crate::config::dynamic::StripPrefixConfig;
use crate::http::handler::{ResponseFuture, SharedHandler};
use crate::middleware::MiddlewareError;

const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";

#[derive(Debug)]
pub struct StripPrefix {
    prefixes: Vec<String>,
}

impl StripPrefix {
    pub fn new(config: &StripPrefixConfig) -> Result<Self, MiddlewareError> {
        if config.prefixes.is_empty() || config.prefixes.iter().any(|p| !p.starts_with('/')) {
            return Err(MiddlewareError::InvalidPrefixes);
        }
        Ok(Self {
            prefixes: config.prefixes.clone(),
        })
    }

    /// The new path-and-query and the prefix removed, if any prefix applies.
    fn strip(&self, uri: &Uri) -> Option<(PathAndQuery, &str)> {
        let path = uri.path();
        let prefix = self
            .prefixes
            .iter()
            .find(|p| path.starts_with(p.trim_end_matches('/')))?;
        let trimmed = prefix.trim_end_matches('/');
        let rest = &path[trimmed.len()..];
        let rest = if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{}", rest)
        };
        let rebuilt = match uri.query() {
            Some(q) => format!("{}?{}", rest, q),
            None => rest,
        };
        let path_and_query = PathAndQuery::try_from(rebuilt).ok()?;
        Some((path_and_query, trimmed))
    }

    pub fn handle(&self, mut req: Request<Body>, next: &SharedHandler) -> ResponseFuture {
        if let Some((path_and_query, prefix)) = self.strip(req.uri()) {
            let mut parts = req.uri().clone().into_parts();
            parts.path_and_query = Some(path_and_query);
            match Uri::from_parts(parts) {
                Ok(uri) => {
                    *req.uri_mut() = uri;
                    if let Ok(value) = HeaderValue::from_str(prefix) {
                        req.headers_mut().insert(X_FORWARDED_PREFIX, value);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to rebuild stripped URI"),
            }
        }
        next.call(req)
    }
}
