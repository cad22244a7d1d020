//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least connections selector.
/// Selects the backend with the minimum number of in-flight requests.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // In case of tie, the first one is selected (stability)
        backends
            .iter()
            .filter(|b| b.weight > 0)
            .min_by_key(|b| b.active_count())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn backend(port: u16) -> Arc<Backend> {
        let url = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
        Arc::new(Backend::new(url, 1).unwrap())
    }

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let b1 = backend(8080);
        let b2 = backend(8081);

        // artificially increase connections on b1
        b1.inc_connections();

        let backends = vec![b1.clone(), b2.clone()];

        // Should pick b2 (0 connections)
        let s1 = lb.next_server(&backends).unwrap();
        assert_eq!(s1.url, b2.url);

        // increase b2
        b2.inc_connections();
        b2.inc_connections(); // now b2 has 2, b1 has 1

        // Should pick b1 (1 connection)
        let s2 = lb.next_server(&backends).unwrap();
        assert_eq!(s2.url, b1.url);
    }
}
