//! Route lookup, dispatch and per-entry-point compilation.
//!
//! # Responsibilities
//! - Compile one entry point's routers into a single handler
//! - Resolve each router's service and middleware chain through the registries
//! - Look up the matching route for a request, or answer 404
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Routes sorted by priority (descending), ties broken by router name
//! - A router that fails to compile is excluded alone; the rest still serve

use axum::body::Body;
use axum::http::Request;
use thiserror::Error;

use crate::config::dynamic::{DynamicConfiguration, RouterConfig};
use crate::http::handler::{not_found, Handler, ResponseFuture, SharedHandler};
use crate::load_balancer::registry::ServiceRegistry;
use crate::load_balancer::service::ServiceError;
use crate::middleware::registry::MiddlewareRegistry;
use crate::middleware::MiddlewareError;
use crate::routing::matcher::Matcher;
use crate::routing::rule::{parse_rule, RuleError};
use futures_util::future;

/// Why a router was left out of its entry point.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),

    #[error("service `{0}` does not exist")]
    UnknownService(String),

    #[error("middleware `{0}` does not exist")]
    UnknownMiddleware(String),

    #[error("service `{name}`: {source}")]
    Service {
        name: String,
        #[source]
        source: ServiceError,
    },

    #[error("middleware `{name}`: {source}")]
    Middleware {
        name: String,
        #[source]
        source: MiddlewareError,
    },
}

/// A compiled router: matcher plus the fully wrapped handler chain.
pub struct Route {
    name: String,
    priority: i64,
    matcher: Box<dyn Matcher>,
    handler: SharedHandler,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        priority: i64,
        matcher: Box<dyn Matcher>,
        handler: SharedHandler,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            matcher,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("matcher", &self.matcher)
            .finish()
    }
}

/// The handler of one entry point: an ordered list of routes.
#[derive(Debug, Default)]
pub struct RouterTree {
    routes: Vec<Route>,
}

impl RouterTree {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
        Self { routes }
    }

    /// Highest-precedence route matching the request.
    pub fn match_request(&self, req: &Request<Body>) -> Option<&Route> {
        self.routes.iter().find(|r| r.matcher.matches(req))
    }

    /// Route names in evaluation order.
    pub fn route_names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Handler for RouterTree {
    fn call(&self, req: Request<Body>) -> ResponseFuture {
        match self.match_request(&req) {
            Some(route) => {
                tracing::trace!(router = %route.name, path = %req.uri().path(), "Route matched");
                route.handler.call(req)
            }
            None => {
                tracing::debug!(path = %req.uri().path(), "No route matched");
                Box::pin(future::ready(not_found()))
            }
        }
    }
}

/// Result of compiling one entry point.
#[derive(Debug)]
pub struct CompiledEntryPoint {
    pub tree: RouterTree,
    /// At least one valid router on this entry point asked for TLS.
    pub tls_requested: bool,
}

/// Compiles routers against one merged configuration, sharing the
/// cycle-scoped service and middleware registries across entry points.
pub struct RouterCompiler<'a, 'p> {
    config: &'a DynamicConfiguration,
    services: &'a mut ServiceRegistry<'p>,
    middlewares: &'a mut MiddlewareRegistry,
}

impl<'a, 'p> RouterCompiler<'a, 'p> {
    pub fn new(
        config: &'a DynamicConfiguration,
        services: &'a mut ServiceRegistry<'p>,
        middlewares: &'a mut MiddlewareRegistry,
    ) -> Self {
        Self {
            config,
            services,
            middlewares,
        }
    }

    /// Compile a single router into a route.
    pub fn compile_route(&mut self, name: &str, router: &RouterConfig) -> Result<Route, CompileError> {
        let matcher = parse_rule(&router.rule)?;

        let service_config = self
            .config
            .services
            .get(&router.service)
            .ok_or_else(|| CompileError::UnknownService(router.service.clone()))?;
        let service = self
            .services
            .get_or_build(&router.service, service_config)
            .map_err(|source| CompileError::Service {
                name: router.service.clone(),
                source,
            })?;

        let mut chain = Vec::with_capacity(router.middlewares.len());
        for middleware_name in &router.middlewares {
            let middleware_config = self
                .config
                .middlewares
                .get(middleware_name)
                .ok_or_else(|| CompileError::UnknownMiddleware(middleware_name.clone()))?;
            let middleware = self
                .middlewares
                .get_or_build(middleware_name, middleware_config)
                .map_err(|source| CompileError::Middleware {
                    name: middleware_name.clone(),
                    source,
                })?;
            chain.push(middleware);
        }

        // Wrap from the inside out so the first declared middleware runs first.
        let mut handler = service.handler();
        for middleware in chain.iter().rev() {
            handler = middleware.wrap(handler);
        }

        Ok(Route::new(name, router.effective_priority(), matcher, handler))
    }

    /// Compile every router of an entry point, skipping the ones that fail.
    pub fn compile<'r, I>(&mut self, entry_point: &str, routers: I) -> CompiledEntryPoint
    where
        I: IntoIterator<Item = (&'r String, &'r RouterConfig)>,
    {
        let mut routes = Vec::new();
        let mut tls_requested = false;

        for (name, router) in routers {
            match self.compile_route(name, router) {
                Ok(route) => {
                    tls_requested |= router.tls;
                    routes.push(route);
                }
                Err(e) => {
                    tracing::warn!(
                        entry_point = %entry_point,
                        router = %name,
                        error = %e,
                        "Router excluded from entry point"
                    );
                }
            }
        }

        let tree = RouterTree::new(routes);
        tracing::debug!(
            entry_point = %entry_point,
            routes = ?tree.route_names(),
            "Entry point compiled"
        );

        CompiledEntryPoint {
            tree,
            tls_requested,
        }
    }
}
