//! RPC client core (component F, §4.F). Request correlation is a table of
//! request-id -> response channel guarded by a hashed timing wheel for
//! timeouts; the sync path layers retry-with-fresh-request-id on top of
//! `invoke_async` (§4.F "Retry (sync path only)").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_std::channel::{bounded, Sender};
use codec::{self, CodecOptions, Frame, FrameHeader, MessageType};
use common::errors::*;
use common::TaggedError;
use discovery::{LoadBalancer, ServiceRegistry};
use parking_lot::Mutex;
use serialize::{RpcValue, SerializerRegistry};

use crate::pool::{Channel, ConnectionPool, FrameHandler, PoolOptions};
use crate::wheel::{TimingWheel, WheelHandle};
use crate::wire::{RequestBody, ResponseBody};

#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    pub tick: Duration,
    pub wheel_size: usize,
    pub codec: CodecOptions,
    pub pool: PoolOptions,
    pub default_retries: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            wheel_size: 512,
            codec: CodecOptions::default(),
            pool: PoolOptions::default(),
            default_retries: 0,
            retry_initial_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
        }
    }
}

struct Pending {
    reply: Sender<Result<RpcValue>>,
    wheel_handle: WheelHandle,
}

/// One logical RPC client: owns a connection pool per remote address and a
/// single correlation table shared by every channel dialed through those
/// pools (a real deployment speaks to many addresses behind one service
/// key, so the client multiplexes across pools keyed by address).
pub struct RpcClient {
    registry: Arc<SerializerRegistry>,
    discovery: Arc<dyn ServiceRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    options: RpcClientOptions,
    pools: Mutex<HashMap<String, Arc<ConnectionPool>>>,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
    wheel: Arc<TimingWheel>,
    next_request_id: AtomicU64,
    shutting_down: Arc<AtomicBool>,
    ticker: Mutex<Option<async_std::task::JoinHandle<()>>>,
}

impl RpcClient {
    pub fn new(
        registry: Arc<SerializerRegistry>,
        discovery: Arc<dyn ServiceRegistry>,
        balancer: Arc<dyn LoadBalancer>,
        options: RpcClientOptions,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            registry,
            discovery,
            balancer,
            wheel: Arc::new(TimingWheel::new(options.wheel_size)),
            options,
            pools: Mutex::new(HashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicU64::new(1),
            shutting_down: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
        });

        let tick_client = client.clone();
        let handle = async_std::task::spawn(async move {
            loop {
                async_std::task::sleep(tick_client.options.tick).await;
                if tick_client.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                for request_id in tick_client.wheel.advance() {
                    tick_client.complete(request_id, Err(TaggedError::new(common::ErrorKind::Timeout, "request timed out").into()));
                }
            }
        });
        *client.ticker.lock() = Some(handle);
        client
    }

    /// Exposes the underlying discovery lookup so the proxy manager's
    /// selection helpers (`getRandom`/`getByZone`/...) can pick an instance
    /// themselves before pinning a proxy to its server id (§4.G).
    pub async fn discover_instances(&self, service_key: &str) -> Result<Vec<discovery::ServiceInstance>> {
        self.discovery.discover_instances(service_key).await
    }

    fn pool_for(self: &Arc<Self>, address: &str) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(address) {
            return pool.clone();
        }
        let pending = self.pending.clone();
        let registry = self.registry.clone();
        let wheel = self.wheel.clone();
        let handler: FrameHandler = Arc::new(move |frame: Frame| {
            if frame.header.message_type != MessageType::Response {
                return;
            }
            let entry = pending.lock().remove(&frame.header.request_id);
            if let Some(entry) = entry {
                wheel.cancel(entry.wheel_handle);
                let decoded = codec::decode_payload(&registry, frame.header.serializer_id, frame.header.compressor_id, &frame.payload)
                    .and_then(|value| ResponseBody::from_value(value)?.into_result());
                let _ = entry.reply.try_send(decoded);
            }
        });
        let pool = ConnectionPool::new(address.to_string(), handler, self.options.pool.clone(), self.options.codec.clone());
        pools.insert(address.to_string(), pool.clone());
        pool
    }

    fn complete(&self, request_id: u64, result: Result<RpcValue>) {
        if let Some(entry) = self.pending.lock().remove(&request_id) {
            let _ = entry.reply.try_send(result);
        }
    }

    fn allocate_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Request lifecycle per §4.F: CAS-check shutdown, allocate future +
    /// timeout, resolve instance, acquire channel, write frame.
    pub async fn invoke_async(self: &Arc<Self>, service_key: &str, method: &str, params: RpcValue, timeout: Duration) -> Result<RpcValue> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(TaggedError::new(common::ErrorKind::ClientShutdown, "client is shut down").into());
        }

        let instances = self.discovery.discover_instances(service_key).await?;
        let instance = self
            .balancer
            .select(&instances, service_key)
            .ok_or_else(|| -> Error { TaggedError::new(common::ErrorKind::NoInstance, format!("no instance for {}", service_key)).into() })?;

        let channel = self.pool_for(&instance.address).acquire().await.map_err(|_| -> Error {
            TaggedError::new(common::ErrorKind::ConnFail, format!("could not acquire channel to {}", instance.address)).into()
        })?;

        let request_id = self.allocate_request_id();
        let (reply_tx, reply_rx) = bounded(1);
        let ticks = ((timeout.as_millis() / self.options.tick.as_millis().max(1)) as usize).max(1);
        let wheel_handle = self.wheel.schedule(request_id, ticks);
        self.pending.lock().insert(request_id, Pending { reply: reply_tx, wheel_handle });

        let body = RequestBody { service_key: service_key.to_string(), method: method.to_string(), params };
        let (serializer_id, compressor_id, payload) = codec::encode_payload(&self.registry, &body.into_value(), &self.options.codec)?;
        let frame = Frame {
            header: FrameHeader { message_type: MessageType::Request, serializer_id, compressor_id, request_id },
            payload,
        };

        if let Err(e) = channel.send(&frame).await {
            let entry = self.pending.lock().remove(&request_id);
            if let Some(entry) = entry {
                self.wheel.cancel(entry.wheel_handle);
            }
            return Err(e);
        }

        reply_rx.recv().await.map_err(|_| -> Error {
            TaggedError::new(common::ErrorKind::Internal, "response channel dropped").into()
        })?
    }

    pub fn invoke(self: &Arc<Self>, service_key: &str, method: &str, params: RpcValue, timeout: Duration) -> Result<RpcValue> {
        async_std::task::block_on(self.invoke_async(service_key, method, params, timeout))
    }

    /// Fire-and-forget: no request id is tracked, no response is awaited.
    pub async fn invoke_one_way(self: &Arc<Self>, service_key: &str, method: &str, params: RpcValue) -> Result<()> {
        let instances = self.discovery.discover_instances(service_key).await?;
        let instance = self
            .balancer
            .select(&instances, service_key)
            .ok_or_else(|| -> Error { TaggedError::new(common::ErrorKind::NoInstance, format!("no instance for {}", service_key)).into() })?;
        let channel = self.pool_for(&instance.address).acquire().await?;

        let body = RequestBody { service_key: service_key.to_string(), method: method.to_string(), params };
        let (serializer_id, compressor_id, payload) = codec::encode_payload(&self.registry, &body.into_value(), &self.options.codec)?;
        let frame = Frame {
            header: FrameHeader { message_type: MessageType::Request, serializer_id, compressor_id, request_id: 0 },
            payload,
        };
        channel.send(&frame).await
    }

    /// Sync-path retry: each attempt gets a fresh request id so a late
    /// response from a previous attempt can never be mistaken for this
    /// one's (§4.F).
    pub async fn invoke_with_retry(self: &Arc<Self>, service_key: &str, method: &str, params: RpcValue, timeout: Duration, retries: u32) -> Result<RpcValue> {
        let mut attempt = 0u32;
        loop {
            match self.invoke_async(service_key, method, params.clone(), timeout).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    let delay = discovery::backoff::retry_delay(self.options.retry_initial_delay, self.options.retry_max_delay, attempt);
                    log::warn!("rpc call {} on {} failed (attempt {}), retrying: {}", method, service_key, attempt, e);
                    async_std::task::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Idempotent shutdown: cancels outstanding futures with `ClientShutdown`.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<u64> = self.pending.lock().keys().copied().collect();
        for request_id in pending {
            self.complete(request_id, Err(TaggedError::new(common::ErrorKind::ClientShutdown, "client shut down").into()));
        }
        if let Some(handle) = self.ticker.lock().take() {
            handle.await;
        }
        let pools: Vec<Arc<ConnectionPool>> = self.pools.lock().values().cloned().collect();
        for pool in pools {
            pool.close().await;
        }
    }
}
