//! Load balancers over an instance list (component D, §4.D). Each
//! balancer is stateless except round-robin, which keeps one monotonic
//! counter per service key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::instance::ServiceInstance;

pub trait LoadBalancer: Send + Sync {
    fn select(&self, instances: &[ServiceInstance], service_key: &str) -> Option<ServiceInstance>;
}

pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(&self, instances: &[ServiceInstance], _service_key: &str) -> Option<ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..instances.len());
        Some(instances[idx].clone())
    }
}

/// Cumulative-sum selection on `instance.weight`. Equal weights degrade to
/// uniform random; an all-zero weight list also degrades to uniform random
/// (a cumulative sum of zero has nothing to select against).
pub struct WeightedBalancer;

impl LoadBalancer for WeightedBalancer {
    fn select(&self, instances: &[ServiceInstance], service_key: &str) -> Option<ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let total: u64 = instances.iter().map(|i| i.weight as u64).sum();
        if total == 0 {
            return RandomBalancer.select(instances, service_key);
        }
        let mut pick = rand::thread_rng().gen_range(0..total);
        for instance in instances {
            let w = instance.weight as u64;
            if pick < w {
                return Some(instance.clone());
            }
            pick -= w;
        }
        instances.last().cloned()
    }
}

/// Per-service-key monotonic counter, `index = counter & MAX_INT mod size`.
pub struct RoundRobinBalancer {
    counters: Mutex<HashMap<String, AtomicUsize>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, instances: &[ServiceInstance], service_key: &str) -> Option<ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let mut counters = self.counters.lock();
        let counter = counters
            .entry(service_key.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let n = counter.fetch_add(1, Ordering::Relaxed);
        let index = (n & (i32::MAX as usize)) % instances.len();
        Some(instances[index].clone())
    }
}

/// Minimum `metadata.load`; missing values sort as +infinity (§4.D).
pub struct LeastLoadBalancer;

impl LoadBalancer for LeastLoadBalancer {
    fn select(&self, instances: &[ServiceInstance], _service_key: &str) -> Option<ServiceInstance> {
        instances.iter().min_by_key(|i| i.load()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances() -> Vec<ServiceInstance> {
        vec![
            ServiceInstance::new("I#1", "a:1").with_weight(0),
            ServiceInstance::new("I#1", "b:1").with_weight(0),
        ]
    }

    #[test]
    fn empty_list_yields_none() {
        assert!(RandomBalancer.select(&[], "I#1").is_none());
        assert!(WeightedBalancer.select(&[], "I#1").is_none());
        assert!(RoundRobinBalancer::new().select(&[], "I#1").is_none());
        assert!(LeastLoadBalancer.select(&[], "I#1").is_none());
    }

    #[test]
    fn all_zero_weights_still_selects_something() {
        let balancer = WeightedBalancer;
        let picked = balancer.select(&instances(), "I#1");
        assert!(picked.is_some());
    }

    #[test]
    fn round_robin_cycles_through_instances() {
        let balancer = RoundRobinBalancer::new();
        let insts = vec![
            ServiceInstance::new("I#1", "a:1"),
            ServiceInstance::new("I#1", "b:1"),
        ];
        let first = balancer.select(&insts, "I#1").unwrap();
        let second = balancer.select(&insts, "I#1").unwrap();
        let third = balancer.select(&insts, "I#1").unwrap();
        assert_ne!(first.address, second.address);
        assert_eq!(first.address, third.address);
    }

    #[test]
    fn least_load_picks_minimum() {
        let insts = vec![
            ServiceInstance::new("I#1", "a:1").with_metadata("load", "10"),
            ServiceInstance::new("I#1", "b:1").with_metadata("load", "3"),
            ServiceInstance::new("I#1", "c:1"),
        ];
        let picked = LeastLoadBalancer.select(&insts, "I#1").unwrap();
        assert_eq!(picked.address, "b:1");
    }

    #[test]
    fn weighted_favors_heavier_instance_over_many_draws() {
        let insts = vec![
            ServiceInstance::new("I#1", "heavy:1").with_weight(990),
            ServiceInstance::new("I#1", "light:1").with_weight(10),
        ];
        let balancer = WeightedBalancer;
        let mut heavy_count = 0;
        for _ in 0..200 {
            if balancer.select(&insts, "I#1").unwrap().address == "heavy:1" {
                heavy_count += 1;
            }
        }
        assert!(heavy_count > 150);
    }
}
