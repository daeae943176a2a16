pub mod backoff;
pub mod balancer;
pub mod instance;
pub mod registry;

pub use balancer::{LeastLoadBalancer, LoadBalancer, RandomBalancer, RoundRobinBalancer, WeightedBalancer};
pub use instance::{make_service_key, parse_service_key, ServiceInstance};
pub use registry::{EtcdServiceRegistry, OfflineCallback, ServiceRegistry, WatchCallback};
