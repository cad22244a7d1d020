//! Per-cycle service arena.
//!
//! Every reload cycle builds each referenced service at most once, so all
//! routers (on every entry point) naming the same service share one instance
//! and therefore one balancing rotation. An instance whose configuration did
//! not change is carried over from the previous cycle.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::dynamic::ServiceConfig;
use crate::load_balancer::service::{LoadBalancedService, ServiceError};
use crate::load_balancer::HttpClient;

/// Services built by one reload cycle, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ServiceArena {
    services: HashMap<String, Arc<LoadBalancedService>>,
}

impl ServiceArena {
    pub fn get(&self, name: &str) -> Option<&Arc<LoadBalancedService>> {
        self.services.get(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<LoadBalancedService>)> {
        self.services.iter()
    }
}

/// Builds services for one cycle.
pub struct ServiceRegistry<'p> {
    client: HttpClient,
    previous: Option<&'p ServiceArena>,
    built: HashMap<String, Arc<LoadBalancedService>>,
}

impl<'p> ServiceRegistry<'p> {
    /// `previous` is the arena of the configuration currently serving traffic.
    pub fn new(client: HttpClient, previous: Option<&'p ServiceArena>) -> Self {
        Self {
            client,
            previous,
            built: HashMap::new(),
        }
    }

    /// Return the cycle's instance for `name`, building it on first use.
    pub fn get_or_build(
        &mut self,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<Arc<LoadBalancedService>, ServiceError> {
        if let Some(service) = self.built.get(name) {
            return Ok(Arc::clone(service));
        }

        let reused = self
            .previous
            .and_then(|arena| arena.get(name))
            .filter(|service| service.config() == config)
            .cloned();

        let service = match reused {
            Some(service) => {
                tracing::trace!(service = %name, "Reusing unchanged service");
                service
            }
            None => Arc::new(LoadBalancedService::new(name, config, self.client.clone())?),
        };

        self.built.insert(name.to_string(), Arc::clone(&service));
        Ok(service)
    }

    /// Finish the cycle.
    pub fn into_arena(self) -> ServiceArena {
        ServiceArena {
            services: self.built,
        }
    }
}
