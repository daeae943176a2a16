//! RPC runtime: wire codec glue, connection pool, client core, proxy
//! manager and server core (components E through H, §4.E-H).

pub mod client;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod wheel;
pub mod wire;

pub use client::{RpcClient, RpcClientOptions};
pub use pool::{Channel, ConnectionPool, FrameHandler, PoolOptions};
pub use proxy::{ProxyManager, ProxyOptions, RpcProxy};
pub use server::{BoxFuture, MethodHandler, RpcServer, RpcServerOptions, ServiceDescriptor};
pub use wheel::{TimingWheel, WheelHandle};
