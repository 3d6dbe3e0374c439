//! Client-side selection of one instance from a healthy address set

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancingStrategy {
    /// Uniformly random choice on every call
    #[default]
    Random,
    /// Cycle through the address set in order
    RoundRobin,
}

/// Load balancer for selecting an address based on a strategy.
///
/// The balancer owns its random source. Nothing here is sticky: each call
/// selects from whatever address set the registry just returned.
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: LoadBalancingStrategy,
    rng: Mutex<StdRng>,
    round_robin_counter: AtomicUsize,
}

impl LoadBalancer {
    /// Create a load balancer seeded from OS entropy
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self::with_rng(strategy, StdRng::from_entropy())
    }

    /// Create a load balancer with a fixed seed, for reproducible selection
    pub fn with_seed(strategy: LoadBalancingStrategy, seed: u64) -> Self {
        Self::with_rng(strategy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(strategy: LoadBalancingStrategy, rng: StdRng) -> Self {
        Self {
            strategy,
            rng: Mutex::new(rng),
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    /// Select an address, `None` only for an empty set
    pub fn select<'a>(&self, addresses: &'a [String]) -> Option<&'a String> {
        match addresses.len() {
            0 => None,
            1 => addresses.first(),
            len => {
                let index = match self.strategy {
                    LoadBalancingStrategy::Random => {
                        let mut rng = match self.rng.lock() {
                            Ok(rng) => rng,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        rng.gen_range(0..len)
                    }
                    LoadBalancingStrategy::RoundRobin => {
                        self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % len
                    }
                };
                addresses.get(index)
            }
        }
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalancingStrategy::Random)
    }
}
