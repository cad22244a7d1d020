//! Per-cycle middleware arena, keyed by middleware name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::dynamic::MiddlewareConfig;
use crate::middleware::{Middleware, MiddlewareError};

#[derive(Debug, Default)]
pub struct MiddlewareRegistry {
    built: HashMap<String, Arc<Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cycle's instance for `name`, building it on first use.
    pub fn get_or_build(
        &mut self,
        name: &str,
        config: &MiddlewareConfig,
    ) -> Result<Arc<Middleware>, MiddlewareError> {
        if let Some(middleware) = self.built.get(name) {
            return Ok(Arc::clone(middleware));
        }
        let middleware = Arc::new(Middleware::build(name, config)?);
        self.built.insert(name.to_string(), Arc::clone(&middleware));
        Ok(middleware)
    }

    pub fn len(&self) -> usize {
        self.built.len()
    }

    pub fn is_empty(&self) -> bool {
        self.built.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dynamic::RateLimitConfig;

    #[test]
    fn same_name_shares_one_instance() {
        let config = MiddlewareConfig::RateLimit(RateLimitConfig {
            average: 10,
            burst: 5,
        });
        let mut registry = MiddlewareRegistry::new();
        let a = registry.get_or_build("limit", &config).unwrap();
        let b = registry.get_or_build("limit", &config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }
}
