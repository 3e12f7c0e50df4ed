use super::{Connector, Transport, TransportError, TransportMessage};
use futures_util::future::{self, BoxFuture};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let endpoint = endpoint.clone();
        async move {
            let (ws, _) = connect_async(endpoint)
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            let (sink, stream) = ws.split();
            let sink = sink
                .sink_map_err(|err| TransportError::Send(err.to_string()))
                .with(|message: TransportMessage| {
                    future::ready(Ok::<_, TransportError>(to_ws(message)))
                });
            let stream = stream.filter_map(|item| {
                future::ready(match item {
                    Ok(message) => from_ws(message).map(Ok),
                    Err(err) => Some(Err(TransportError::Receive(err.to_string()))),
                })
            });
            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        }
        .boxed()
    }
}

fn to_ws(message: TransportMessage) -> Message {
    match message {
        TransportMessage::Text(text) => Message::Text(text),
        TransportMessage::Ping(data) => Message::Ping(data),
        TransportMessage::Pong(data) => Message::Pong(data),
        TransportMessage::Close => Message::Close(None),
    }
}

fn from_ws(message: Message) -> Option<TransportMessage> {
    match message {
        Message::Text(text) => Some(TransportMessage::Text(text)),
        Message::Binary(bytes) => String::from_utf8(bytes).ok().map(TransportMessage::Text),
        Message::Ping(data) => Some(TransportMessage::Ping(data)),
        Message::Pong(data) => Some(TransportMessage::Pong(data)),
        Message::Close(_) => Some(TransportMessage::Close),
        Message::Frame(_) => None,
    }
}
