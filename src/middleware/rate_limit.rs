//! Per-client token bucket rate limiting.
//!
//! Clients are keyed by the peer IP address. `average` tokens are added per
//! second up to `burst`; each request takes one. Once more than
//! `MAX_TRACKED_CLIENTS` clients are tracked, buckets that have refilled
//! completely are evicted before a new client is added.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures_util::future;

use crate::config::dynamic::RateLimitConfig;
use crate::http::handler::{ResponseFuture, SharedHandler};
use crate::middleware::MiddlewareError;
use crate::observability::metrics;

/// Client count past which idle buckets are evicted.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether the bucket would be back at capacity at `now`.
    fn is_full(&self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }
}

#[derive(Debug)]
pub struct RateLimit {
    name: String,
    average: f64,
    burst: f64,
    max_clients: usize,
    buckets: DashMap<IpAddr, TokenBucket>,
}

impl RateLimit {
    pub fn new(name: &str, config: &RateLimitConfig) -> Result<Self, MiddlewareError> {
        if config.average > 0 && config.burst == 0 {
            return Err(MiddlewareError::InvalidBurst);
        }
        Ok(Self {
            name: name.to_string(),
            average: config.average as f64,
            burst: config.burst as f64,
            max_clients: MAX_TRACKED_CLIENTS,
            buckets: DashMap::new(),
        })
    }

    /// Take a token for `client`. Always succeeds when `average` is zero.
    fn check(&self, client: IpAddr, now: Instant) -> bool {
        if self.average == 0.0 {
            return true;
        }
        if self.buckets.len() >= self.max_clients && !self.buckets.contains_key(&client) {
            self.evict_idle(now);
        }
        let mut bucket = self
            .buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.burst, now));
        bucket.try_acquire(self.burst, self.average, now)
    }

    /// Drop buckets that have refilled; they behave exactly like new ones.
    fn evict_idle(&self, now: Instant) {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_full(self.burst, self.average, now));
        tracing::debug!(
            middleware = %self.name,
            evicted = before - self.buckets.len(),
            "Evicted idle rate limit buckets"
        );
    }

    pub fn handle(&self, req: Request<Body>, next: &SharedHandler) -> ResponseFuture {
        let client = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        if self.check(client, Instant::now()) {
            next.call(req)
        } else {
            tracing::warn!(middleware = %self.name, client = %client, "Rate limit exceeded");
            metrics::record_rate_limited(&self.name);
            Box::pin(future::ready(
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response(),
            ))
        }
    }
}
