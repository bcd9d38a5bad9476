//! Scriptable socket factory for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grip_publish::TransportError;

use crate::config::SocketParams;
use crate::socket::{PushSocket, SocketFactory};

/// A frame delivered by a mock socket.
#[derive(Debug, Clone)]
pub(crate) struct Sent {
    pub socket_id: usize,
    pub host: String,
    pub frame: Bytes,
}

#[derive(Default)]
struct State {
    connects: AtomicUsize,
    closes: AtomicUsize,
    refused: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    connect_delay: Mutex<Duration>,
    send_delay: Mutex<Duration>,
    sent: Mutex<Vec<Sent>>,
    shut_down: AtomicBool,
}

/// Hosts are taken from the endpoint, so tests give each server a
/// distinct host.
#[derive(Default)]
pub(crate) struct MockFactory {
    state: Arc<State>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, host: &str) {
        self.state.refused.lock().unwrap().insert(host.to_string());
    }

    pub fn accept(&self, host: &str) {
        self.state.refused.lock().unwrap().remove(host);
    }

    pub fn fail_sends(&self, host: &str, fail: bool) {
        let mut failing = self.state.failing.lock().unwrap();
        if fail {
            failing.insert(host.to_string());
        } else {
            failing.remove(host);
        }
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.state.send_delay.lock().unwrap() = delay;
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }
}

fn host_of(endpoint: &str) -> String {
    let rest = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    rest.split(':').next().unwrap_or(rest).to_string()
}

#[async_trait]
impl SocketFactory for MockFactory {
    async fn connect(
        &self,
        endpoint: &str,
        _params: &SocketParams,
    ) -> Result<Box<dyn PushSocket>, TransportError> {
        let delay = *self.state.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let id = self.state.connects.fetch_add(1, Ordering::SeqCst);
        let host = host_of(endpoint);
        if self.state.refused.lock().unwrap().contains(&host) {
            return Err(TransportError::Connection(format!("{endpoint} refused")));
        }
        Ok(Box::new(MockSocket {
            id,
            host,
            state: self.state.clone(),
            open: true,
        }))
    }

    async fn shutdown(&self) {
        self.state.shut_down.store(true, Ordering::SeqCst);
    }
}

struct MockSocket {
    id: usize,
    host: String,
    state: Arc<State>,
    open: bool,
}

#[async_trait]
impl PushSocket for MockSocket {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let delay = *self.state.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state.failing.lock().unwrap().contains(&self.host) {
            return Err(TransportError::Publish(format!("{} rejected", self.host)));
        }
        self.state.sent.lock().unwrap().push(Sent {
            socket_id: self.id,
            host: self.host.clone(),
            frame,
        });
        Ok(())
    }

    async fn close(&mut self, _linger: Duration) {
        if std::mem::take(&mut self.open) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
