//! Custom request / response headers.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};

use crate::config::dynamic::HeadersConfig;
use crate::http::handler::{ResponseFuture, SharedHandler};
use crate::middleware::MiddlewareError;

/// Set a header, or remove it when the value is `None`.
type HeaderRewrite = Vec<(HeaderName, Option<HeaderValue>)>;

#[derive(Debug)]
pub struct Headers {
    request: HeaderRewrite,
    response: HeaderRewrite,
}

fn parse(headers: &BTreeMap<String, String>) -> Result<HeaderRewrite, MiddlewareError> {
    headers
        .iter()
        .map(|(name, value)| {
            let invalid = |reason: String| MiddlewareError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = if value.is_empty() {
                None
            } else {
                Some(HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?)
            };
            Ok((header, value))
        })
        .collect()
}

fn apply(rewrite: &HeaderRewrite, headers: &mut HeaderMap) {
    for (name, value) in rewrite {
        match value {
            Some(v) => {
                headers.insert(name.clone(), v.clone());
            }
            None => {
                headers.remove(name);
            }
        }
    }
}

impl Headers {
    pub fn new(config: &HeadersConfig) -> Result<Self, MiddlewareError> {
        Ok(Self {
            request: parse(&config.custom_request_headers)?,
            response: parse(&config.custom_response_headers)?,
        })
    }

    pub fn handle(&self, mut req: Request<Body>, next: &SharedHandler) -> ResponseFuture {
        apply(&self.request, req.headers_mut());
        let response_headers = self.response.clone();
        let fut = next.call(req);
        Box::pin(async move {
            let mut res = fut.await;
            apply(&response_headers, res.headers_mut());
            res
        })
    }
}
