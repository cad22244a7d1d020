//! Request handler abstraction shared by routers, middlewares and services.
//!
//! # Responsibilities
//! - Define the uniform "request in, response out" contract
//! - Allow handlers to be composed (a middleware wraps the next handler)
//! - Provide trivial handlers (not found, closures) for composition and tests
//!
//! # Design Decisions
//! - Handlers are shared trait objects (`Arc<dyn Handler>`), so one compiled
//!   service can sit behind many routers without being rebuilt
//! - The returned future is `'static`: implementations clone what they need
//!   (usually `Arc`s) into it instead of borrowing `self`
//! - Handlers never fail; errors are expressed as HTTP responses

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::{self, BoxFuture};

/// Future returned by [`Handler::call`].
pub type ResponseFuture = BoxFuture<'static, Response>;

/// A composable request handler.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, req: Request<Body>) -> ResponseFuture;
}

/// Handler shared by reference between every router that points at it.
pub type SharedHandler = Arc<dyn Handler>;

/// Responds `404 Not Found` to everything.
///
/// Used as the live handler of an entry point before the first configuration
/// arrives, and as the fallback of a router tree when no rule matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Handler for NotFound {
    fn call(&self, _req: Request<Body>) -> ResponseFuture {
        Box::pin(future::ready(not_found()))
    }
}

/// The canonical "nothing routed here" response.
pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found").into_response()
}

/// Adapts an async closure into a [`Handler`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    HandlerFn { f }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request<Body>) -> ResponseFuture {
        Box::pin((self.f)(req))
    }
}
