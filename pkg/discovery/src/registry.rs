//! Service registry/discovery over an external coordination service
//! (component C, §4.C). The coordination substrate only needs to provide
//! {ephemeral nodes, watches, retryable connect} (§9 design notes); this
//! module binds that capability set to `etcd-client`, but any store with
//! lease-like TTLs and a prefix watch would satisfy the same trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_std::task::JoinHandle;
use common::async_trait;
use common::errors::*;
use etcd_client::{Client, GetOptions, PutOptions, WatchOptions};
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::backoff::{Backoff, BackoffOptions};
use crate::instance::{parse_service_key, registration_path, ServiceInstance};

pub type WatchCallback = Arc<dyn Fn(Vec<ServiceInstance>) + Send + Sync>;
pub type OfflineCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, instance: ServiceInstance) -> Result<()>;
    async fn unregister(&self, instance: &ServiceInstance) -> Result<()>;
    async fn discover(&self, service_key: &str) -> Result<Vec<String>>;
    async fn discover_instances(&self, service_key: &str) -> Result<Vec<ServiceInstance>>;
    async fn watch(&self, service_key: &str, on_change: WatchCallback);
    fn set_offline_callback(&self, callback: OfflineCallback);
}

fn encode_instance(instance: &ServiceInstance) -> String {
    let metadata = instance
        .metadata
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}\n{}", instance.weight, metadata)
}

fn decode_instance(service_key: &str, address: &str, value: &str) -> ServiceInstance {
    let mut lines = value.splitn(2, '\n');
    let weight = lines.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(100);
    let mut metadata = HashMap::new();
    if let Some(meta) = lines.next() {
        for pair in meta.split(',').filter(|p| !p.is_empty()) {
            if let Some((k, v)) = pair.split_once('=') {
                metadata.insert(k.to_string(), v.to_string());
            }
        }
    }
    ServiceInstance {
        service_key: service_key.to_string(),
        address: address.to_string(),
        weight,
        metadata,
    }
}

/// Key prefix for a discovery query. `server_id == 0` means "any instance
/// of this interface" so we only prefix on the interface name, dropping
/// the `#<serverId>` segment (GLOSSARY).
fn discovery_prefix(root: &str, service_key: &str) -> String {
    let root = root.trim_end_matches('/');
    match parse_service_key(service_key) {
        Some((interface, 0)) => format!("{}/{}#", root, interface),
        _ => format!("{}/{}/", root, service_key),
    }
}

struct RegisteredLease {
    lease_id: i64,
    keeper_task: JoinHandle<()>,
}

pub struct EtcdServiceRegistry {
    client: Mutex<Client>,
    root: String,
    lease_ttl_seconds: i64,
    leases: Mutex<HashMap<(String, String), RegisteredLease>>,
    offline_callback: Arc<Mutex<Option<OfflineCallback>>>,
}

impl EtcdServiceRegistry {
    pub async fn connect(endpoints: &[&str], root: impl Into<String>) -> Result<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| format_err!("failed to connect to coordination service: {}", e))?;
        Ok(Self {
            client: Mutex::new(client),
            root: root.into(),
            lease_ttl_seconds: 10,
            leases: Mutex::new(HashMap::new()),
            offline_callback: Arc::new(Mutex::new(None)),
        })
    }

    fn client_handle(&self) -> Client {
        self.client.lock().clone()
    }

    async fn fetch_instances(&self, service_key: &str) -> Result<Vec<ServiceInstance>> {
        let prefix = discovery_prefix(&self.root, service_key);
        let mut client = self.client_handle();
        let resp = client
            .get(prefix.as_bytes(), Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| format_err!("discovery query failed: {}", e))?;

        let mut out = Vec::new();
        for kv in resp.kvs() {
            let key = kv.key_str().unwrap_or_default();
            let address = match key.rsplit_once('/') {
                Some((_, addr)) => addr,
                None => continue,
            };
            let service_key_segment = key
                .strip_prefix(&format!("{}/", self.root.trim_end_matches('/')))
                .and_then(|rest| rest.rsplit_once('/'))
                .map(|(key, _)| key)
                .unwrap_or(service_key);
            out.push(decode_instance(
                service_key_segment,
                address,
                kv.value_str().unwrap_or_default(),
            ));
        }
        Ok(out)
    }

    /// Keeps a lease alive until the process dies or unregisters, retrying
    /// transient failures with bounded exponential backoff; a lease that
    /// cannot be renewed after exhausting backoff is a permanent loss and
    /// fires the offline callback for this service key.
    async fn run_keepalive(
        client: Client,
        lease_id: i64,
        service_key: String,
        offline_callback: Arc<Mutex<Option<OfflineCallback>>>,
    ) {
        let mut backoff = Backoff::new(BackoffOptions::default());
        let mut client = client;

        loop {
            let keepalive = client.lease_keep_alive(lease_id).await;
            match keepalive {
                Ok((mut keeper, mut stream)) => {
                    backoff.reset();
                    loop {
                        if keeper.keep_alive().await.is_err() {
                            break;
                        }
                        match stream.message().await {
                            Ok(Some(_)) => {
                                async_std::task::sleep(Duration::from_secs(3)).await;
                            }
                            _ => break,
                        }
                    }
                }
                Err(e) => {
                    warn!("lease keep-alive failed for {}: {}", service_key, e);
                }
            }

            let delay = backoff.next_delay();
            match delay {
                Some(d) => async_std::task::sleep(d).await,
                None => {
                    error!(
                        "lease for {} permanently lost after exhausting retries",
                        service_key
                    );
                    if let Some(cb) = offline_callback.lock().as_ref() {
                        cb(&service_key);
                    }
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ServiceRegistry for EtcdServiceRegistry {
    async fn register(&self, instance: ServiceInstance) -> Result<()> {
        let mut client = self.client_handle();
        let lease = client
            .lease_grant(self.lease_ttl_seconds, None)
            .await
            .map_err(|e| format_err!("lease grant failed: {}", e))?;
        let lease_id = lease.id();

        let path = registration_path(&self.root, &instance.service_key, &instance.address);
        client
            .put(
                path.as_bytes(),
                encode_instance(&instance).into_bytes(),
                Some(PutOptions::new().with_lease(lease_id)),
            )
            .await
            .map_err(|e| format_err!("registration put failed: {}", e))?;

        info!("registered {} at {}", instance.service_key, instance.address);

        let offline = self.offline_callback.clone();
        let keeper_task = async_std::task::spawn(Self::run_keepalive(
            self.client_handle(),
            lease_id,
            instance.service_key.clone(),
            offline,
        ));

        self.leases.lock().insert(instance.identity(), RegisteredLease { lease_id, keeper_task });

        Ok(())
    }

    async fn unregister(&self, instance: &ServiceInstance) -> Result<()> {
        let path = registration_path(&self.root, &instance.service_key, &instance.address);
        let mut client = self.client_handle();
        client
            .delete(path.as_bytes(), None)
            .await
            .map_err(|e| format_err!("unregister failed: {}", e))?;

        let lease = self.leases.lock().remove(&instance.identity());
        if let Some(lease) = lease {
            lease.keeper_task.cancel().await;
        }
        Ok(())
    }

    async fn discover(&self, service_key: &str) -> Result<Vec<String>> {
        Ok(self
            .fetch_instances(service_key)
            .await?
            .into_iter()
            .map(|i| i.address)
            .collect())
    }

    async fn discover_instances(&self, service_key: &str) -> Result<Vec<ServiceInstance>> {
        self.fetch_instances(service_key).await
    }

    async fn watch(&self, service_key: &str, on_change: WatchCallback) {
        let prefix = discovery_prefix(&self.root, service_key);
        let mut client = self.client_handle();
        let service_key = service_key.to_string();

        // Push the current full set immediately, then again on every change.
        if let Ok(instances) = self.fetch_instances(&service_key).await {
            on_change(instances);
        }

        let watch_client = client.clone();
        async_std::task::spawn(async move {
            let mut client = watch_client;
            let mut backoff = Backoff::new(BackoffOptions::default());
            loop {
                let watch_result = client
                    .watch(prefix.as_bytes(), Some(WatchOptions::new().with_prefix()))
                    .await;

                let (_watcher, mut stream) = match watch_result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("watch on {} failed: {}", prefix, e);
                        match backoff.next_delay() {
                            Some(d) => {
                                async_std::task::sleep(d).await;
                                continue;
                            }
                            None => return,
                        }
                    }
                };
                backoff.reset();

                while let Ok(Some(_resp)) = stream.message().await {
                    let mut fetch_client = client.clone();
                    let key = service_key.clone();
                    let prefix = prefix.clone();
                    let resp = fetch_client
                        .get(prefix.as_bytes(), Some(GetOptions::new().with_prefix()))
                        .await;
                    if let Ok(resp) = resp {
                        let instances = resp
                            .kvs()
                            .iter()
                            .filter_map(|kv| {
                                let k = kv.key_str().ok()?;
                                let addr = k.rsplit_once('/')?.1;
                                Some(decode_instance(&key, addr, kv.value_str().unwrap_or_default()))
                            })
                            .collect();
                        on_change(instances);
                    }
                }
            }
        });
    }

    fn set_offline_callback(&self, callback: OfflineCallback) {
        *self.offline_callback.lock() = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_server_id_drops_specific_id_from_prefix() {
        assert_eq!(
            discovery_prefix("services", "com.slg.Login#0"),
            "services/com.slg.Login#"
        );
        assert_eq!(
            discovery_prefix("services", "com.slg.Login#3"),
            "services/com.slg.Login#3/"
        );
    }

    #[test]
    fn instance_metadata_round_trips() {
        let instance = ServiceInstance::new("I#1", "1.2.3.4:80")
            .with_weight(50)
            .with_metadata("zone-id", "us-east")
            .with_metadata("load", "12");
        let encoded = encode_instance(&instance);
        let decoded = decode_instance("I#1", "1.2.3.4:80", &encoded);
        assert_eq!(decoded.weight, 50);
        assert_eq!(decoded.zone(), Some("us-east"));
        assert_eq!(decoded.load(), 12);
    }
}
