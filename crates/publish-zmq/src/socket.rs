use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use zeromq::{Socket, SocketSend, ZmqMessage};

use grip_publish::TransportError;

use crate::config::SocketParams;

/// One connected push socket.
#[async_trait]
pub trait PushSocket: Send {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Release the socket, waiting at most `linger` for queued frames.
    async fn close(&mut self, linger: Duration);
}

/// Creates connected push sockets. Owns whatever context they share.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        params: &SocketParams,
    ) -> Result<Box<dyn PushSocket>, TransportError>;

    /// Tear down the shared context. Called once, after every socket is closed.
    async fn shutdown(&self) {}
}

/// Factory backed by the pure-Rust `zeromq` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZmqSocketFactory;

#[async_trait]
impl SocketFactory for ZmqSocketFactory {
    async fn connect(
        &self,
        endpoint: &str,
        params: &SocketParams,
    ) -> Result<Box<dyn PushSocket>, TransportError> {
        let mut socket = zeromq::PushSocket::new();
        tokio::time::timeout(params.connect_timeout, socket.connect(endpoint))
            .await
            .map_err(|_| TransportError::Timeout(params.connect_timeout))?
            .map_err(|e| TransportError::Connection(format!("{endpoint}: {e}")))?;

        tracing::debug!(endpoint, "push socket connected");
        Ok(Box::new(ZmqPushSocket {
            endpoint: endpoint.to_string(),
            inner: Some(socket),
        }))
    }
}

struct ZmqPushSocket {
    endpoint: String,
    inner: Option<zeromq::PushSocket>,
}

#[async_trait]
impl PushSocket for ZmqPushSocket {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let socket = self.inner.as_mut().ok_or(TransportError::Closed)?;
        socket
            .send(ZmqMessage::from(frame))
            .await
            .map_err(|e| TransportError::Publish(format!("{}: {e}", self.endpoint)))
    }

    async fn close(&mut self, linger: Duration) {
        let Some(socket) = self.inner.take() else {
            return;
        };
        if tokio::time::timeout(linger, socket.close()).await.is_err() {
            tracing::debug!(endpoint = %self.endpoint, "socket close exceeded linger, dropped");
        }
    }
}
