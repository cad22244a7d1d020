//! HTTP Basic authentication.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future;

use crate::config::dynamic::BasicAuthConfig;
use crate::http::handler::{ResponseFuture, SharedHandler};
use crate::middleware::MiddlewareError;

#[derive(Debug)]
pub struct BasicAuth {
    /// user → password
    users: HashMap<String, String>,
    challenge: HeaderValue,
    remove_header: bool,
}

impl BasicAuth {
    pub fn new(config: &BasicAuthConfig) -> Result<Self, MiddlewareError> {
        if config.users.is_empty() {
            return Err(MiddlewareError::NoUsers);
        }

        let mut users = HashMap::with_capacity(config.users.len());
        for entry in &config.users {
            match entry.split_once(':') {
                Some((user, password)) if !user.is_empty() => {
                    users.insert(user.to_string(), password.to_string());
                }
                _ => return Err(MiddlewareError::InvalidUser(entry.clone())),
            }
        }

        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", config.realm))
            .map_err(|e| MiddlewareError::InvalidHeader {
                name: header::WWW_AUTHENTICATE.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            users,
            challenge,
            remove_header: config.remove_header,
        })
    }

    /// Returns the authenticated user, if any.
    fn authenticate(&self, req: &Request<Body>) -> Option<String> {
        let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, encoded) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        match self.users.get(user) {
            Some(expected) if expected == password => Some(user.to_string()),
            _ => None,
        }
    }

    pub fn handle(&self, mut req: Request<Body>, next: &SharedHandler) -> ResponseFuture {
        match self.authenticate(&req) {
            Some(user) => {
                tracing::trace!(user = %user, "Basic auth accepted");
                if self.remove_header {
                    req.headers_mut().remove(header::AUTHORIZATION);
                }
                next.call(req)
            }
            None => {
                tracing::debug!(path = %req.uri().path(), "Basic auth rejected");
                Box::pin(future::ready(self.unauthorized()))
            }
        }
    }

    fn unauthorized(&self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, self.challenge.clone())],
            "401 Unauthorized",
        )
            .into_response()
    }
}
