//! RPC server core (component H, §4.H). Method dispatch is a registration
//! table built at server start rather than reflection (§9 "Reflective
//! service dispatch"); the negative cache still exists to reject a
//! hostile/garbled method name before touching the service map at all.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_std::net::{TcpListener, TcpStream};
use codec::{self, CodecOptions, Frame, FrameHeader, MessageType};
use common::errors::*;
use common::TaggedError;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serialize::{RpcValue, SerializerRegistry};

use crate::wire::{RequestBody, ResponseBody};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type MethodHandler = Arc<dyn Fn(RpcValue) -> BoxFuture<Result<RpcValue>> + Send + Sync>;

/// One registered service interface: a fixed name -> handler table built
/// once at startup (§9 "generated stub tables").
#[derive(Default)]
pub struct ServiceDescriptor {
    methods: std::collections::HashMap<String, MethodHandler>,
}

impl ServiceDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, method: impl Into<String>, handler: MethodHandler) -> Self {
        self.methods.insert(method.into(), handler);
        self
    }

    fn get(&self, method: &str) -> Option<MethodHandler> {
        self.methods.get(method).cloned()
    }
}

/// Bounded FIFO set of `(service_key, method)` pairs already known not to
/// resolve, so repeated hostile requests short-circuit before a map lookup
/// on the (much larger) service table (§4.H point 2).
struct NegativeCache {
    capacity: usize,
    order: Mutex<VecDeque<(String, String)>>,
    set: Mutex<HashSet<(String, String)>>,
}

impl NegativeCache {
    fn new(capacity: usize) -> Self {
        Self { capacity, order: Mutex::new(VecDeque::new()), set: Mutex::new(HashSet::new()) }
    }

    fn contains(&self, service_key: &str, method: &str) -> bool {
        self.set.lock().contains(&(service_key.to_string(), method.to_string()))
    }

    fn insert(&self, service_key: &str, method: &str) {
        let key = (service_key.to_string(), method.to_string());
        let mut set = self.set.lock();
        if !set.insert(key.clone()) {
            return;
        }
        let mut order = self.order.lock();
        order.push_back(key);
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpcServerOptions {
    pub codec: CodecOptions,
    pub idle_timeout: Duration,
    pub negative_cache_capacity: usize,
}

impl Default for RpcServerOptions {
    fn default() -> Self {
        Self {
            codec: CodecOptions::default(),
            idle_timeout: Duration::from_secs(30),
            negative_cache_capacity: 4096,
        }
    }
}

pub struct RpcServer {
    registry: Arc<SerializerRegistry>,
    services: RwLock<std::collections::HashMap<String, Arc<ServiceDescriptor>>>,
    negative_cache: NegativeCache,
    options: RpcServerOptions,
}

impl RpcServer {
    pub fn new(registry: Arc<SerializerRegistry>, options: RpcServerOptions) -> Arc<Self> {
        Arc::new(Self {
            registry,
            services: RwLock::new(std::collections::HashMap::new()),
            negative_cache: NegativeCache::new(options.negative_cache_capacity),
            options,
        })
    }

    pub fn register_service(&self, service_key: impl Into<String>, descriptor: ServiceDescriptor) {
        self.services.write().insert(service_key.into(), Arc::new(descriptor));
    }

    /// Accepts connections until the process-wide shutdown signal fires
    /// (`common::shutdown`), so a bootstrap `stop()` on this module's
    /// owning [`module::Module`] just has to trigger that signal once —
    /// every RPC server in the process stops accepting on the same tick.
    pub async fn serve(self: Arc<Self>, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| TaggedError::new(common::ErrorKind::ConnFail, format!("bind {} failed: {}", bind_addr, e)))?;
        let mut incoming = listener.incoming();
        loop {
            let next = futures::future::select(
                Box::pin(incoming.next()),
                Box::pin(common::shutdown::wait_for_shutdown()),
            )
            .await;
            let stream = match next {
                futures::future::Either::Right((_, _)) => {
                    log::info!("rpc server on {} stopping: shutdown signalled", bind_addr);
                    break;
                }
                futures::future::Either::Left((None, _)) => break,
                futures::future::Either::Left((Some(Err(e)), _)) => {
                    log::warn!("accept failed: {}", e);
                    continue;
                }
                futures::future::Either::Left((Some(Ok(stream)), _)) => stream,
            };
            let server = self.clone();
            async_std::task::spawn(async move {
                server.handle_connection(stream).await;
            });
        }
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
        let mut reader = stream.clone();
        loop {
            let read = futures::future::select(
                Box::pin(codec::frame::read_frame(&mut reader, &self.options.codec)),
                Box::pin(async_std::task::sleep(self.options.idle_timeout)),
            )
            .await;
            let frame = match read {
                futures::future::Either::Left((Ok(frame), _)) => frame,
                futures::future::Either::Left((Err(e), _)) => {
                    log::debug!("connection {} closed: {}", peer, e);
                    break;
                }
                futures::future::Either::Right((_, _)) => {
                    log::debug!("connection {} idle-timed out", peer);
                    break;
                }
            };

            match frame.header.message_type {
                MessageType::HeartbeatRequest => {
                    // Answered inline, never goes through the business dispatcher (§4.H).
                    let reply = Frame {
                        header: FrameHeader {
                            message_type: MessageType::HeartbeatResponse,
                            serializer_id: 0,
                            compressor_id: 0,
                            request_id: frame.header.request_id,
                        },
                        payload: Vec::new(),
                    };
                    let mut writer = stream.clone();
                    let _ = codec::frame::write_frame(&mut writer, &reply, &self.options.codec).await;
                }
                MessageType::Request => {
                    let server = self.clone();
                    let writer = stream.clone();
                    // Virtual-thread-per-task equivalent (§9): an async-std
                    // task is cheap enough that one per request is fine and
                    // keeps a slow handler from blocking this connection's reader.
                    async_std::task::spawn(async move {
                        server.dispatch_request(frame, writer).await;
                    });
                }
                MessageType::Response | MessageType::HeartbeatResponse => {
                    log::warn!("server received unexpected {:?} frame from {}", frame.header.message_type, peer);
                }
            }
        }
    }

    async fn dispatch_request(self: Arc<Self>, frame: Frame, mut writer: TcpStream) {
        let request_id = frame.header.request_id;
        let is_one_way = request_id == 0;

        let response_body = match self.resolve_and_invoke(&frame).await {
            Ok(value) => ResponseBody::Ok(value),
            Err(e) => ResponseBody::Err { kind: common::errors::kind_of(&e), message: e.to_string() },
        };

        if is_one_way {
            return;
        }

        let value = response_body.into_value();
        let encoded = codec::encode_payload(&self.registry, &value, &self.options.codec);
        let (serializer_id, compressor_id, payload) = match encoded {
            Ok(parts) => parts,
            Err(e) => {
                log::error!("failed to encode response for request {}: {}", request_id, e);
                return;
            }
        };
        let response = Frame {
            header: FrameHeader { message_type: MessageType::Response, serializer_id, compressor_id, request_id },
            payload,
        };
        if let Err(e) = codec::frame::write_frame(&mut writer, &response, &self.options.codec).await {
            log::warn!("failed to write response for request {}: {}", request_id, e);
        }
    }

    async fn resolve_and_invoke(&self, frame: &Frame) -> Result<RpcValue> {
        let value = codec::decode_payload(&self.registry, frame.header.serializer_id, frame.header.compressor_id, &frame.payload)?;
        let body = RequestBody::from_value(value)?;

        if self.negative_cache.contains(&body.service_key, &body.method) {
            return Err(not_found(&body.service_key, &body.method));
        }

        let service = self.services.read().get(&body.service_key).cloned().ok_or_else(|| {
            self.negative_cache.insert(&body.service_key, &body.method);
            not_found(&body.service_key, &body.method)
        })?;

        let handler = service.get(&body.method).ok_or_else(|| {
            self.negative_cache.insert(&body.service_key, &body.method);
            not_found(&body.service_key, &body.method)
        })?;

        handler(body.params).await
    }
}

fn not_found(service_key: &str, method: &str) -> Error {
    TaggedError::new(common::ErrorKind::NotFound, format!("no method {} on service {}", method, service_key)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_cache_evicts_oldest_past_capacity() {
        let cache = NegativeCache::new(2);
        cache.insert("svc#0", "a");
        cache.insert("svc#0", "b");
        cache.insert("svc#0", "c");
        assert!(!cache.contains("svc#0", "a"));
        assert!(cache.contains("svc#0", "b"));
        assert!(cache.contains("svc#0", "c"));
    }

    #[async_std::test]
    async fn service_descriptor_dispatches_registered_methods() {
        let descriptor = ServiceDescriptor::new().register(
            "ping",
            Arc::new(|_params: RpcValue| -> BoxFuture<Result<RpcValue>> { Box::pin(async { Ok(RpcValue::Str("pong".into())) }) }),
        );
        let handler = descriptor.get("ping").expect("registered");
        let result = handler(RpcValue::Null).await.unwrap();
        assert_eq!(result, RpcValue::Str("pong".into()));
        assert!(descriptor.get("missing").is_none());
    }
}
