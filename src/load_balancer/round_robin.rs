//! Weighted round-robin load balancing strategy.

use std::sync::{Arc, Mutex, PoisonError};

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Smooth weighted round-robin selector.
///
/// Every pick adds each backend's weight to its running score, selects the
/// highest score and subtracts the total weight from it. With equal weights
/// this degenerates to plain rotation; with weights 5/1/1 it yields
/// `a a b a c a a` rather than bursts of `a`.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    scores: Mutex<Vec<i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let total: i64 = backends.iter().map(|b| i64::from(b.weight)).sum();
        if total == 0 {
            return None;
        }

        let mut scores = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        if scores.len() != backends.len() {
            *scores = vec![0; backends.len()];
        }

        let mut best: Option<usize> = None;
        for (index, backend) in backends.iter().enumerate() {
            scores[index] += i64::from(backend.weight);
            if backend.weight > 0 && best.map_or(true, |b| scores[index] > scores[b]) {
                best = Some(index);
            }
        }

        let index = best?;
        scores[index] -= total;
        Some(backends[index].clone())
    }
}
