use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream};
use std::pin::Pin;
use thiserror::Error;
use url::Url;

pub mod memory;
pub mod ws;

pub use memory::{memory_transport, MemoryConnector, MemoryListener, ServerSide};
pub use ws::WsConnector;

/// Transport-level message, independent of the underlying socket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("transport closed")]
    Closed,
}

pub type TransportSink = Pin<Box<dyn Sink<TransportMessage, Error = TransportError> + Send>>;
pub type TransportStream =
    Pin<Box<dyn Stream<Item = Result<TransportMessage, TransportError>> + Send>>;

/// One open duplex connection, split into its outbound and inbound halves.
pub struct Transport {
    pub sink: TransportSink,
    pub stream: TransportStream,
}

/// Opens transports. The returned future must not borrow the connector.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Transport, TransportError>>;
}
