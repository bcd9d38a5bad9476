mod config;
mod health;
mod pool;
mod socket;
mod transport;

#[cfg(test)]
mod mock;

pub use config::{SocketParams, ZmqTransportConfig};
pub use health::ZmqHealthChecker;
pub use pool::{PooledSocket, PrunePolicy, SocketPool};
pub use socket::{PushSocket, SocketFactory, ZmqSocketFactory};
pub use transport::ZmqTransport;
