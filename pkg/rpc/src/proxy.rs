//! Proxy manager (component G, §4.G). The source reflects on a method's
//! return type to pick a call shape at invocation time; per the redesign
//! note in §9 ("Return-type polymorphism") we make that binding explicit
//! instead — a [`RpcProxy`] exposes three named call modes and the caller
//! picks one, rather than the manager guessing from a return type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::errors::*;
use discovery::{LoadBalancer, ServiceInstance};
use parking_lot::RwLock;
use serialize::RpcValue;

use crate::client::RpcClient;

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5), retries: 0 }
    }
}

/// A proxy bound to one service key (load-balanced if `server_id == 0`,
/// pinned to a single instance otherwise per the `#<serverId>` convention,
/// GLOSSARY "Service key").
pub struct RpcProxy {
    client: Arc<RpcClient>,
    service_key: String,
    options: ProxyOptions,
}

impl RpcProxy {
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    pub async fn call_async(&self, method: &str, params: RpcValue) -> Result<RpcValue> {
        if self.options.retries == 0 {
            self.client.invoke_async(&self.service_key, method, params, self.options.timeout).await
        } else {
            self.client
                .invoke_with_retry(&self.service_key, method, params, self.options.timeout, self.options.retries)
                .await
        }
    }

    pub fn call_sync(&self, method: &str, params: RpcValue) -> Result<RpcValue> {
        async_std::task::block_on(self.call_async(method, params))
    }

    pub async fn call_one_way(&self, method: &str, params: RpcValue) -> Result<()> {
        self.client.invoke_one_way(&self.service_key, method, params).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProxyCacheKey {
    interface_name: String,
    server_id: u32,
    timeout_millis: u64,
    retries: u32,
}

/// Caches proxies by `(interfaceName, serverId, timeout, retries)` (§4.G).
/// `server_id == 0` proxies are load-balanced and safe to cache forever;
/// pinned proxies are evicted when the discovery offline callback fires
/// for their service key (wired by the caller via [`ProxyManager::evict_for_service_key`]).
pub struct ProxyManager {
    client: Arc<RpcClient>,
    cache: RwLock<HashMap<ProxyCacheKey, Arc<RpcProxy>>>,
}

impl ProxyManager {
    pub fn new(client: Arc<RpcClient>) -> Arc<Self> {
        Arc::new(Self { client, cache: RwLock::new(HashMap::new()) })
    }

    fn get_or_build(&self, interface_name: &str, server_id: u32, options: ProxyOptions) -> Arc<RpcProxy> {
        let key = ProxyCacheKey {
            interface_name: interface_name.to_string(),
            server_id,
            timeout_millis: options.timeout.as_millis() as u64,
            retries: options.retries,
        };
        if let Some(proxy) = self.cache.read().get(&key) {
            return proxy.clone();
        }
        let service_key = discovery::make_service_key(interface_name, server_id);
        let proxy = Arc::new(RpcProxy { client: self.client.clone(), service_key, options });
        self.cache.write().insert(key, proxy.clone());
        proxy
    }

    /// Load-balanced proxy (`#0`); the balancer used is whichever the
    /// underlying client was built with.
    pub fn get(&self, interface_name: &str, options: ProxyOptions) -> Arc<RpcProxy> {
        self.get_or_build(interface_name, 0, options)
    }

    /// A proxy pinned to one server id, chosen by the caller via any
    /// selection strategy over a discovered instance list.
    pub fn get_by_server_id(&self, interface_name: &str, server_id: u32, options: ProxyOptions) -> Arc<RpcProxy> {
        self.get_or_build(interface_name, server_id, options)
    }

    pub async fn get_random(&self, interface_name: &str, options: ProxyOptions) -> Result<Arc<RpcProxy>> {
        self.pick(interface_name, options, |instances| discovery::RandomBalancer.select(instances, interface_name)).await
    }

    pub async fn get_by_weight(&self, interface_name: &str, options: ProxyOptions) -> Result<Arc<RpcProxy>> {
        self.pick(interface_name, options, |instances| discovery::WeightedBalancer.select(instances, interface_name)).await
    }

    pub async fn get_round_robin(&self, interface_name: &str, options: ProxyOptions) -> Result<Arc<RpcProxy>> {
        let balancer = discovery::RoundRobinBalancer::default();
        self.pick(interface_name, options, |instances| balancer.select(instances, interface_name)).await
    }

    pub async fn get_by_load(&self, interface_name: &str, options: ProxyOptions) -> Result<Arc<RpcProxy>> {
        self.pick(interface_name, options, |instances| discovery::LeastLoadBalancer.select(instances, interface_name)).await
    }

    pub async fn get_by_zone(&self, interface_name: &str, zone: &str, options: ProxyOptions) -> Result<Arc<RpcProxy>> {
        let zone = zone.to_string();
        self.pick(interface_name, options, move |instances| {
            let in_zone: Vec<ServiceInstance> = instances.iter().filter(|i| i.zone() == Some(zone.as_str())).cloned().collect();
            discovery::RandomBalancer.select(&in_zone, interface_name)
        })
        .await
    }

    async fn pick(
        &self,
        interface_name: &str,
        options: ProxyOptions,
        select: impl FnOnce(&[ServiceInstance]) -> Option<ServiceInstance>,
    ) -> Result<Arc<RpcProxy>> {
        let service_key = discovery::make_service_key(interface_name, 0);
        let instances = self.client.discover_instances(&service_key).await?;
        let chosen = select(&instances).ok_or_else(|| -> Error {
            common::TaggedError::new(common::ErrorKind::NoInstance, format!("no instance for {}", interface_name)).into()
        })?;
        let server_id = discovery::parse_service_key(&chosen.service_key).map(|(_, id)| id).unwrap_or(0);
        Ok(self.get_or_build(interface_name, server_id, options))
    }

    /// Evicts every cached proxy pinned to a server id under this service
    /// key when the discovery offline callback fires (§4.C, §4.G).
    pub fn evict_for_service_key(&self, service_key: &str) {
        let (interface_name, server_id) = match discovery::parse_service_key(service_key) {
            Some(parsed) => parsed,
            None => return,
        };
        if server_id == 0 {
            return; // load-balanced proxies are always safe to keep.
        }
        self.cache.write().retain(|key, _| !(key.interface_name == interface_name && key.server_id == server_id));
    }
}
