use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery mechanism a message may be rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    WebSocket,
    Sse,
    /// Raw HTTP streaming without SSE framing.
    HttpStream,
    HttpResponse,
    HttpResponseSse,
    LongPolling,
}

impl TransportKind {
    /// The transports a message targets when the publisher does not say.
    #[must_use]
    pub fn defaults() -> BTreeSet<TransportKind> {
        BTreeSet::from([
            TransportKind::WebSocket,
            TransportKind::Sse,
            TransportKind::HttpResponseSse,
            TransportKind::LongPolling,
        ])
    }
}

/// Transport-agnostic unit of publication.
///
/// Created once per publish call and never mutated afterwards; the
/// `with_*` builders consume and return the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    channel: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_type: Option<String>,

    data: Value,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_id: Option<String>,

    /// Routing hint only; never part of the client-visible JSON.
    #[serde(skip_serializing, default = "TransportKind::defaults")]
    target_transports: BTreeSet<TransportKind>,
}

impl Message {
    pub fn new(channel: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            channel: channel.into(),
            event_type: None,
            data: data.into(),
            metadata: BTreeMap::new(),
            id: None,
            prev_id: None,
            target_transports: TransportKind::defaults(),
        }
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_ids(mut self, id: impl Into<String>, prev_id: Option<String>) -> Self {
        self.id = Some(id.into());
        self.prev_id = prev_id;
        self
    }

    #[must_use]
    pub fn with_transports(mut self, transports: impl IntoIterator<Item = TransportKind>) -> Self {
        self.target_transports = transports.into_iter().collect();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn prev_id(&self) -> Option<&str> {
        self.prev_id.as_deref()
    }

    pub fn target_transports(&self) -> &BTreeSet<TransportKind> {
        &self.target_transports
    }

    pub fn targets(&self, kind: TransportKind) -> bool {
        self.target_transports.contains(&kind)
    }
}
