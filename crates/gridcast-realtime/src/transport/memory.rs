use super::{Connector, Transport, TransportError, TransportMessage};
use futures_util::future::BoxFuture;
use futures_util::{sink, stream, FutureExt};
use gridcast_core::protocol::{
    decode_frame, encode_frame, AckPayload, ClientFrame, ServerFrame, DEFAULT_MAX_FRAME_BYTES,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

struct Shared {
    incoming: mpsc::UnboundedSender<ServerSide>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

/// In-process transport. The connector hands each opened connection to the
/// paired [`MemoryListener`], which plays the server role.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

pub struct MemoryListener {
    shared: Arc<Shared>,
    incoming: mpsc::UnboundedReceiver<ServerSide>,
}

pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        incoming: tx,
        refuse: AtomicBool::new(false),
        attempts: AtomicUsize::new(0),
    });
    (
        MemoryConnector {
            shared: Arc::clone(&shared),
        },
        MemoryListener {
            shared,
            incoming: rx,
        },
    )
}

impl Connector for MemoryConnector {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let shared = Arc::clone(&self.shared);
        let endpoint = endpoint.clone();
        async move {
            shared.attempts.fetch_add(1, Ordering::SeqCst);
            if shared.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Connect(format!("{endpoint} refused connection")));
            }
            let (to_server, from_client) = mpsc::unbounded_channel();
            let (to_client, from_server) = mpsc::unbounded_channel();
            let server = ServerSide {
                to_client,
                from_client,
            };
            shared
                .incoming
                .send(server)
                .map_err(|_| TransportError::Connect(format!("{endpoint} has no listener")))?;

            let sink = sink::unfold(
                to_server,
                |tx: mpsc::UnboundedSender<TransportMessage>, message: TransportMessage| async move {
                    tx.send(message).map_err(|_| TransportError::Closed)?;
                    Ok::<_, TransportError>(tx)
                },
            );
            let stream = stream::unfold(from_server, |mut rx| async move {
                rx.recv().await.map(|message| (Ok(message), rx))
            });
            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }
        .boxed()
    }
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<ServerSide> {
        self.incoming.recv().await
    }

    pub fn try_accept(&mut self) -> Option<ServerSide> {
        self.incoming.try_recv().ok()
    }

    /// Make subsequent connects fail before reaching the listener.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connection_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Server half of one in-memory connection. Dropping it ends the client's stream.
pub struct ServerSide {
    to_client: mpsc::UnboundedSender<TransportMessage>,
    from_client: mpsc::UnboundedReceiver<TransportMessage>,
}

impl ServerSide {
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        self.from_client.recv().await
    }

    /// Next protocol frame from the client; `None` once the client closes.
    pub async fn recv_frame(&mut self) -> Option<ClientFrame> {
        loop {
            match self.recv().await? {
                TransportMessage::Text(text) => {
                    return decode_frame(&text, DEFAULT_MAX_FRAME_BYTES).ok();
                }
                TransportMessage::Close => return None,
                TransportMessage::Ping(_) | TransportMessage::Pong(_) => continue,
            }
        }
    }

    pub fn send(&self, message: TransportMessage) -> bool {
        self.to_client.send(message).is_ok()
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match encode_frame(frame, DEFAULT_MAX_FRAME_BYTES) {
            Ok(text) => self.send(TransportMessage::Text(text)),
            Err(_) => false,
        }
    }

    pub fn ack(&self, connection_timeout_ms: Option<u64>) -> bool {
        self.send_frame(&ServerFrame::ConnectionAck {
            payload: AckPayload {
                connection_timeout_ms,
            },
        })
    }

    pub fn ping(&self, data: Vec<u8>) -> bool {
        self.send(TransportMessage::Ping(data))
    }

    pub fn close(self) {
        let _ = self.to_client.send(TransportMessage::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    fn endpoint() -> Url {
        Url::parse("wss://memory.test/graphql").expect("url")
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (connector, mut listener) = memory_transport();
        let mut transport = connector.connect(&endpoint()).await.expect("connect");
        let mut server = listener.accept().await.expect("accept");

        transport
            .sink
            .send(TransportMessage::Text("hello".to_string()))
            .await
            .expect("send");
        assert_eq!(
            server.recv().await,
            Some(TransportMessage::Text("hello".to_string()))
        );

        assert!(server.ping(vec![1, 2]));
        assert_eq!(
            transport.stream.next().await,
            Some(Ok(TransportMessage::Ping(vec![1, 2])))
        );

        drop(server);
        assert!(transport.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn refused_connections_never_reach_the_listener() {
        let (connector, mut listener) = memory_transport();
        listener.refuse_connections(true);
        let result = connector.connect(&endpoint()).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert!(listener.try_accept().is_none());
        assert_eq!(listener.connection_attempts(), 1);
    }
}
