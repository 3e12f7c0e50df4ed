use crate::error::SubscriptionError;
use gridcast_core::WidgetContentStore;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Callbacks for one logical subscription. Invoked from the client task in
/// wire order, so implementations must not block.
pub trait SubscriptionHandler: Send + Sync {
    fn next(&self, item: Value);
    fn error(&self, error: SubscriptionError);
    fn complete(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Next(Value),
    Error(SubscriptionError),
    Complete,
}

#[derive(Clone)]
pub struct SubscriptionSpec {
    pub query: String,
    pub variables: Value,
    /// Dotted path applied to each data payload before it reaches `next`.
    pub path: Option<String>,
    pub handler: Arc<dyn SubscriptionHandler>,
}

impl SubscriptionSpec {
    pub fn new(
        query: impl Into<String>,
        variables: Value,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Self {
        Self {
            query: query.into(),
            variables,
            path: None,
            handler,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Spec whose events are delivered on the returned receiver.
    pub fn channel(
        query: impl Into<String>,
        variables: Value,
    ) -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let spec = Self::new(query, variables, Arc::new(ChannelHandler { tx }));
        (spec, rx)
    }
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("query", &self.query)
            .field("variables", &self.variables)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

struct ChannelHandler {
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl SubscriptionHandler for ChannelHandler {
    fn next(&self, item: Value) {
        let _ = self.tx.send(SubscriptionEvent::Next(item));
    }

    fn error(&self, error: SubscriptionError) {
        let _ = self.tx.send(SubscriptionEvent::Error(error));
    }

    fn complete(&self) {
        let _ = self.tx.send(SubscriptionEvent::Complete);
    }
}

/// Writes every item into a named widget content channel.
pub struct ContentChannelHandler {
    content: WidgetContentStore,
    channel_id: String,
}

impl ContentChannelHandler {
    pub fn new(content: WidgetContentStore, channel_id: impl Into<String>) -> Self {
        Self {
            content,
            channel_id: channel_id.into(),
        }
    }
}

impl SubscriptionHandler for ContentChannelHandler {
    fn next(&self, item: Value) {
        self.content.set(self.channel_id.clone(), item);
    }

    fn error(&self, error: SubscriptionError) {
        warn!(channel = %self.channel_id, "content_channel_error: {error}");
    }
}
