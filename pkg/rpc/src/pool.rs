//! Per-address connection pool (component E, §4.E). A fixed-capacity array
//! of channel slots; acquiring rotates through the array and lazily repairs
//! any slot whose channel has gone unhealthy. Concurrent repairs of the
//! same slot race under a per-slot lock rather than a hardware CAS — the
//! loser simply closes the channel it just dialed instead of publishing it,
//! which is the same "loser closes its connection" outcome with a mutex
//! standing in for the atomic pointer swap.

use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_std::net::TcpStream;
use async_std::task::JoinHandle;
use codec::{CodecOptions, Frame, FrameHeader, MessageType};
use common::errors::*;
use common::TaggedError;
use parking_lot::Mutex;

pub type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub capacity: usize,
    pub initial: usize,
    pub heartbeat_interval: Duration,
    pub max_fail: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: 8,
            initial: 1,
            heartbeat_interval: Duration::from_secs(10),
            max_fail: 3,
        }
    }
}

/// One transport connection plus its idle-writer heartbeat and inbound
/// dispatcher (§4.E bullet list).
pub struct Channel {
    pub address: String,
    write_half: Mutex<TcpStream>,
    active: Arc<AtomicBool>,
    fail_count: Arc<AtomicU32>,
    last_write: Arc<Mutex<Instant>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    codec_options: CodecOptions,
}

impl Channel {
    pub async fn connect(
        address: &str,
        handler: FrameHandler,
        options: &PoolOptions,
        codec_options: CodecOptions,
    ) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TaggedError::new(common::ErrorKind::ConnFail, format!("connect {} failed: {}", address, e)))?;

        let channel = Arc::new(Self {
            address: address.to_string(),
            write_half: Mutex::new(stream.clone()),
            active: Arc::new(AtomicBool::new(true)),
            fail_count: Arc::new(AtomicU32::new(0)),
            last_write: Arc::new(Mutex::new(Instant::now())),
            background: Mutex::new(Vec::new()),
            codec_options: codec_options.clone(),
        });

        let reader = {
            let mut read_stream = stream.clone();
            let active = channel.active.clone();
            let fail_count = channel.fail_count.clone();
            let write_half_for_heartbeat_reply = channel.clone();
            let codec_options = codec_options.clone();
            async_std::task::spawn(async move {
                loop {
                    match codec::frame::read_frame(&mut read_stream, &codec_options).await {
                        Ok(frame) => match frame.header.message_type {
                            MessageType::HeartbeatRequest => {
                                let reply = Frame {
                                    header: FrameHeader {
                                        message_type: MessageType::HeartbeatResponse,
                                        serializer_id: 0,
                                        compressor_id: 0,
                                        request_id: frame.header.request_id,
                                    },
                                    payload: Vec::new(),
                                };
                                let _ = write_half_for_heartbeat_reply.send(&reply).await;
                            }
                            MessageType::HeartbeatResponse => {
                                fail_count.store(0, Ordering::Relaxed);
                            }
                            MessageType::Request | MessageType::Response => {
                                handler(frame);
                            }
                        },
                        Err(_) => {
                            active.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            })
        };

        let heartbeat = {
            let channel = channel.clone();
            let interval = options.heartbeat_interval;
            let max_fail = options.max_fail;
            async_std::task::spawn(async move {
                loop {
                    async_std::task::sleep(interval).await;
                    if !channel.is_active() {
                        break;
                    }
                    let idle_for = channel.last_write.lock().elapsed();
                    if idle_for < interval {
                        continue;
                    }
                    let failures = channel.fail_count.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures > max_fail {
                        log::warn!("channel {} exceeded max heartbeat failures, closing", channel.address);
                        channel.close().await;
                        break;
                    }
                    let ping = Frame {
                        header: FrameHeader {
                            message_type: MessageType::HeartbeatRequest,
                            serializer_id: 0,
                            compressor_id: 0,
                            request_id: 0,
                        },
                        payload: Vec::new(),
                    };
                    if channel.send(&ping).await.is_err() {
                        channel.close().await;
                        break;
                    }
                }
            })
        };

        channel.background.lock().push(reader);
        channel.background.lock().push(heartbeat);
        Ok(channel)
    }

    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_active() {
            return Err(TaggedError::new(common::ErrorKind::ConnFail, "channel is closed").into());
        }
        let mut stream = self.write_half.lock().clone();
        let result = codec::frame::write_frame(&mut stream, frame, &self.codec_options).await;
        if result.is_ok() {
            *self.last_write.lock() = Instant::now();
        } else {
            self.active.store(false, Ordering::SeqCst);
        }
        result
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        let stream = self.write_half.lock().clone();
        let _ = stream.shutdown(Shutdown::Both);
    }
}

/// Fixed-capacity pool of channels to one remote address (§4.E).
pub struct ConnectionPool {
    address: String,
    options: PoolOptions,
    codec_options: CodecOptions,
    handler: FrameHandler,
    slots: Vec<Mutex<Option<Arc<Channel>>>>,
    counter: AtomicUsize,
    initialized: AtomicBool,
    closed: AtomicBool,
    init_lock: async_std::sync::Mutex<()>,
}

impl ConnectionPool {
    pub fn new(address: impl Into<String>, handler: FrameHandler, options: PoolOptions, codec_options: CodecOptions) -> Arc<Self> {
        let capacity = options.capacity.max(1);
        Arc::new(Self {
            address: address.into(),
            options,
            codec_options,
            handler,
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            counter: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            init_lock: async_std::sync::Mutex::new(()),
        })
    }

    async fn ensure_initial(&self) {
        if self.initialized.load(Ordering::SeqCst) {
            return;
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return;
        }
        for idx in 0..self.options.initial.min(self.slots.len()) {
            if let Ok(channel) = Channel::connect(&self.address, self.handler.clone(), &self.options, self.codec_options.clone()).await {
                *self.slots[idx].lock() = Some(channel);
            }
        }
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub async fn acquire(&self) -> Result<Arc<Channel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TaggedError::new(common::ErrorKind::ConnFail, format!("pool for {} is closed", self.address)).into());
        }
        self.ensure_initial().await;
        let n = self.slots.len();
        for _ in 0..n {
            let idx = self.counter.fetch_add(1, Ordering::Relaxed) % n;
            let existing = self.slots[idx].lock().clone();
            if let Some(channel) = existing {
                if channel.is_active() {
                    return Ok(channel);
                }
            }

            let fresh = match Channel::connect(&self.address, self.handler.clone(), &self.options, self.codec_options.clone()).await {
                Ok(channel) => channel,
                Err(_) => continue,
            };

            let mut slot = self.slots[idx].lock();
            let slot_is_healthy = slot.as_ref().map(|c| c.is_active()).unwrap_or(false);
            if slot_is_healthy {
                drop(slot);
                fresh.close().await;
                continue;
            }
            *slot = Some(fresh.clone());
            drop(slot);
            return Ok(fresh);
        }

        Err(TaggedError::new(common::ErrorKind::ConnFail, format!("no healthy channel available for {}", self.address)).into())
    }

    /// Sweeps and closes every slot; re-acquiring afterwards fails fast
    /// instead of dialing a fresh connection (§4.E).
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for slot in &self.slots {
            let channel = slot.lock().take();
            if let Some(channel) = channel {
                channel.close().await;
            }
        }
    }
}
