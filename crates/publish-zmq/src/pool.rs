use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell, Semaphore};

use grip_publish::{ProxyServer, TransportError};

use crate::config::SocketParams;
use crate::socket::{PushSocket, SocketFactory};

/// A connected socket plus the bookkeeping the pool evicts on.
///
/// Sends on one socket are serialized; at most `send_hwm` may be queued
/// at once and the rest fail immediately with `QueueFull`.
pub struct PooledSocket {
    server_id: String,
    socket: Mutex<Option<Box<dyn PushSocket>>>,
    queue: Semaphore,
    params: SocketParams,
    created_at: Instant,
    last_used_ms: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl PooledSocket {
    fn new(server_id: String, socket: Box<dyn PushSocket>, params: &SocketParams) -> Self {
        Self {
            server_id,
            socket: Mutex::new(Some(socket)),
            queue: Semaphore::new(params.send_hwm),
            params: params.clone(),
            created_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// # Errors
    /// `QueueFull` when the high-water mark is reached, `Timeout` when the
    /// send outlives `send_timeout`, `Closed` after `close`, or the socket's
    /// own send error.
    pub async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let Ok(_permit) = self.queue.try_acquire() else {
            return Err(TransportError::QueueFull {
                server: self.server_id.clone(),
                hwm: self.params.send_hwm,
            });
        };
        self.touch();

        let mut guard = self.socket.lock().await;
        let socket = guard.as_mut().ok_or(TransportError::Closed)?;
        let result = tokio::time::timeout(self.params.send_timeout, socket.send(frame))
            .await
            .unwrap_or(Err(TransportError::Timeout(self.params.send_timeout)));
        drop(guard);

        if result.is_ok() {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Close the underlying socket. Later sends fail with `Closed`.
    pub async fn close(&self) {
        let socket = self.socket.lock().await.take();
        if let Some(mut socket) = socket {
            socket.close(self.params.linger).await;
        }
    }

    pub fn idle_for(&self) -> Duration {
        let offset = Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed));
        (self.created_at + offset).elapsed()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.created_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_used_ms.store(elapsed, Ordering::Relaxed);
    }
}

/// When the maintenance pass evicts a pooled socket.
#[derive(Debug, Clone, Copy)]
pub struct PrunePolicy {
    pub idle_ttl: Duration,
    /// Zero disables failure-based eviction.
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    retry_at: Instant,
}

type Slot = Arc<OnceCell<Arc<PooledSocket>>>;

/// One push socket per server id, created on first use.
///
/// Lookups and creation go through the concurrent map without a global
/// lock; the first caller for an id connects and concurrent callers wait
/// on the same cell. `structural` is held only while entries are removed.
pub struct SocketPool {
    factory: Arc<dyn SocketFactory>,
    params: SocketParams,
    entries: DashMap<String, Slot>,
    backoff: DashMap<String, Backoff>,
    structural: Mutex<()>,
    closed: AtomicBool,
}

impl SocketPool {
    pub fn new(factory: Arc<dyn SocketFactory>, params: SocketParams) -> Self {
        Self {
            factory,
            params,
            entries: DashMap::new(),
            backoff: DashMap::new(),
            structural: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Return the pooled socket for `server`, connecting on first use.
    ///
    /// # Errors
    /// `Closed` after shutdown, otherwise whatever `open` reports.
    pub async fn get_or_create(
        &self,
        server: &ProxyServer,
    ) -> Result<Arc<PooledSocket>, TransportError> {
        self.check_closed()?;
        let slot = self.entries.entry(server.id.clone()).or_default().clone();
        let socket = slot.get_or_try_init(|| self.open(server)).await?.clone();

        // shutdown or eviction may have run while the connect was in flight
        let still_pooled = self
            .entries
            .get(&server.id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), &slot));
        if self.closed.load(Ordering::SeqCst) || !still_pooled {
            tracing::debug!(server = %server.id, "socket orphaned while connecting, closed");
            socket.close().await;
            return Err(TransportError::Closed);
        }
        Ok(socket)
    }

    /// Connect a fresh socket that the pool does not track. The caller
    /// owns it and must close it.
    ///
    /// # Errors
    /// `Backoff` while a previous connect failure is cooling down, `Closed`
    /// after shutdown, or the factory's connect error.
    pub async fn open(&self, server: &ProxyServer) -> Result<Arc<PooledSocket>, TransportError> {
        self.check_closed()?;
        self.check_backoff(&server.id)?;

        match self
            .factory
            .connect(&server.publish_endpoint(), &self.params)
            .await
        {
            Ok(mut socket) => {
                if self.closed.load(Ordering::SeqCst) {
                    socket.close(self.params.linger).await;
                    return Err(TransportError::Closed);
                }
                self.backoff.remove(&server.id);
                Ok(Arc::new(PooledSocket::new(
                    server.id.clone(),
                    socket,
                    &self.params,
                )))
            }
            Err(e) => {
                let delay = self.record_connect_failure(&server.id);
                tracing::warn!(server = %server.id, retry_in = ?delay, "connect failed: {e}");
                Err(e)
            }
        }
    }

    /// Drop and close the socket for `server_id`. Returns whether an entry
    /// was pooled, connected or still connecting.
    pub async fn evict(&self, server_id: &str) -> bool {
        let guard = self.structural.lock().await;
        let removed = self.entries.remove(server_id);
        drop(guard);

        let Some((_, slot)) = removed else {
            return false;
        };
        close_slot(&slot).await;
        true
    }

    /// Evict `socket` only if it is still the pooled socket for its server.
    pub async fn evict_socket(&self, socket: &Arc<PooledSocket>) -> bool {
        let guard = self.structural.lock().await;
        let removed = self
            .entries
            .remove_if(socket.server_id(), |_, slot| {
                slot.get().is_some_and(|pooled| Arc::ptr_eq(pooled, socket))
            })
            .is_some();
        drop(guard);

        if removed {
            socket.close().await;
        }
        removed
    }

    /// Evict sockets for servers no longer in `live_ids`, sockets idle past
    /// the TTL, and sockets that keep failing. Returns the evicted ids.
    pub async fn prune(&self, policy: PrunePolicy, live_ids: &HashSet<String>) -> Vec<String> {
        let guard = self.structural.lock().await;

        let stale: Vec<(String, &'static str)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let reason = if !live_ids.contains(entry.key()) {
                    "server gone"
                } else {
                    let socket = entry.value().get()?;
                    if socket.idle_for() >= policy.idle_ttl {
                        "idle"
                    } else if policy.max_consecutive_failures > 0
                        && socket.consecutive_failures() >= policy.max_consecutive_failures
                    {
                        "failing"
                    } else {
                        return None;
                    }
                };
                Some((entry.key().clone(), reason))
            })
            .collect();

        self.backoff.retain(|id, _| live_ids.contains(id));

        let removed: Vec<(String, Slot)> = stale
            .into_iter()
            .filter_map(|(id, reason)| {
                let (id, slot) = self.entries.remove(&id)?;
                tracing::debug!(server = %id, reason, "evicted pooled socket");
                Some((id, slot))
            })
            .collect();
        drop(guard);

        let mut evicted = Vec::with_capacity(removed.len());
        for (id, slot) in removed {
            close_slot(&slot).await;
            evicted.push(id);
        }
        evicted
    }

    /// Close every pooled socket and refuse further use. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.structural.lock().await;

        let slots: Vec<Slot> = self.entries.iter().map(|e| e.value().clone()).collect();
        self.entries.clear();
        self.backoff.clear();
        for slot in slots {
            if let Some(socket) = slot.get() {
                socket.close().await;
            }
        }
        tracing::debug!("socket pool closed");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, server_id: &str) -> bool {
        self.entries.contains_key(server_id)
    }

    pub fn params(&self) -> &SocketParams {
        &self.params
    }

    fn check_closed(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn check_backoff(&self, server_id: &str) -> Result<(), TransportError> {
        if let Some(backoff) = self.backoff.get(server_id) {
            let now = Instant::now();
            if now < backoff.retry_at {
                return Err(TransportError::Backoff {
                    server: server_id.to_string(),
                    remaining: backoff.retry_at - now,
                });
            }
        }
        Ok(())
    }

    fn record_connect_failure(&self, server_id: &str) -> Duration {
        let mut backoff = self
            .backoff
            .entry(server_id.to_string())
            .or_insert(Backoff {
                failures: 0,
                retry_at: Instant::now(),
            });
        backoff.failures = backoff.failures.saturating_add(1);
        let delay = self.params.reconnect_delay(backoff.failures);
        backoff.retry_at = Instant::now() + delay;
        delay
    }
}

/// Close the socket in `slot`, if its connect has finished. A slot still
/// connecting is closed by `get_or_create` once it sees the slot is gone.
async fn close_slot(slot: &Slot) {
    if let Some(socket) = slot.get() {
        socket.close().await;
    }
}
