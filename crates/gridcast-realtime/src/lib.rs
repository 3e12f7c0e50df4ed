pub mod client;
pub mod credentials;
pub mod error;
pub mod handler;
pub mod jobs;
pub mod mux;
pub mod reconnect;
pub mod transport;

pub use client::{ConnectionState, ConnectionStatus, RealtimeClient, RealtimeOptions};
pub use credentials::Credentials;
pub use error::{ConnectError, SubscriptionError};
pub use handler::{ContentChannelHandler, SubscriptionEvent, SubscriptionHandler, SubscriptionSpec};
pub use jobs::{job_subscription, JobStatus, JobUpdate};
pub use mux::{extract_path, SubscriptionKey};
pub use reconnect::{BackoffPolicy, ReconnectController, ReconnectDecision};
pub use transport::{
    memory_transport, Connector, MemoryConnector, MemoryListener, ServerSide, Transport,
    TransportError, TransportMessage, WsConnector,
};
