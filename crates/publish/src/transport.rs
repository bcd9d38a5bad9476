use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;

use crate::message::Message;
use crate::server::ProxyServer;

/// Delivery mechanism from the application to the proxy fleet.
/// Created once, shared across the application.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    /// Ship one message to every active server, reporting each server's result.
    ///
    /// Per-server failures are logged and recorded as `false`; they never
    /// abort delivery to the remaining servers.
    async fn publish_outcome(&self, message: &Message) -> PublishOutcome;

    /// `true` only if at least one server was resolved and all of them
    /// accepted the message.
    async fn publish(&self, message: &Message) -> bool {
        self.publish_outcome(message).await.succeeded()
    }

    /// Name matched against the configured active transport.
    fn transport_type(&self) -> &'static str;

    /// Release held resources. Idempotent.
    async fn shutdown(&self) {}
}

/// Per-server results of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub results: Vec<(String, bool)>,
}

impl PublishOutcome {
    pub fn no_servers() -> Self {
        Self::default()
    }

    /// Logical AND over all servers; an empty outcome is a failure.
    pub fn succeeded(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|(_, ok)| *ok)
    }

    pub fn failed_servers(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Run `send` for every server concurrently and wait for all of them.
///
/// A panicking send counts as `false` for its server only.
pub async fn fan_out<'a, F, Fut>(servers: &'a [ProxyServer], send: F) -> PublishOutcome
where
    F: Fn(&'a ProxyServer) -> Fut,
    Fut: Future<Output = bool>,
{
    let attempts = servers.iter().map(|server| {
        let id = server.id.clone();
        let attempt = AssertUnwindSafe(send(server)).catch_unwind();
        async move {
            let ok = attempt.await.unwrap_or_else(|_| {
                tracing::error!(server = %id, "publish attempt panicked");
                false
            });
            (id, ok)
        }
    });
    PublishOutcome {
        results: join_all(attempts).await,
    }
}
