use gridcast_core::protocol::{ClientFrame, ErrorPayload, ServerError, ServerFrame};
use gridcast_realtime::{
    memory_transport, BackoffPolicy, ConnectError, ConnectionState, Credentials, MemoryListener,
    RealtimeClient, RealtimeOptions, ServerSide, SubscriptionError, SubscriptionEvent,
    SubscriptionSpec, TransportMessage,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

fn credentials(token: &str) -> Credentials {
    Credentials::bearer(
        Url::parse("wss://realtime.test/graphql").expect("url"),
        token,
    )
}

fn options() -> RealtimeOptions {
    RealtimeOptions {
        handshake_timeout: Duration::from_secs(2),
        keepalive_timeout: Duration::from_secs(30),
        backoff: BackoffPolicy {
            base_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
        },
        ..RealtimeOptions::default()
    }
}

async fn accept_and_ack(listener: &mut MemoryListener) -> (ServerSide, String) {
    let mut server = listener.accept().await.expect("client connection");
    let credential = match server.recv_frame().await {
        Some(ClientFrame::ConnectionInit { payload }) => payload.credential,
        other => panic!("expected connection_init, got {other:?}"),
    };
    assert!(server.ack(None));
    (server, credential)
}

/// Query text -> correlation id for the next `count` start frames.
async fn collect_starts(server: &mut ServerSide, count: usize) -> HashMap<String, String> {
    let mut ids = HashMap::new();
    while ids.len() < count {
        match server.recv_frame().await {
            Some(ClientFrame::Start { id, payload }) => {
                ids.insert(payload.query, id);
            }
            other => panic!("expected start, got {other:?}"),
        }
    }
    ids
}

fn data(id: &str, value: Value) -> ServerFrame {
    ServerFrame::Data {
        id: id.to_string(),
        payload: json!({"data": {"value": value}}),
    }
}

fn channel(query: &str) -> (SubscriptionSpec, tokio::sync::mpsc::UnboundedReceiver<SubscriptionEvent>) {
    let (spec, rx) = SubscriptionSpec::channel(query, json!({}));
    (spec.with_path("data.value"), rx)
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_handshake() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());

    let (first, second, (server, credential)) = tokio::join!(
        client.connect(credentials("token-a")),
        client.connect(credentials("token-a")),
        accept_and_ack(&mut listener),
    );
    first.expect("first connect");
    second.expect("second connect");
    assert_eq!(credential, "token-a");
    assert_eq!(listener.connection_attempts(), 1);
    assert!(listener.try_accept().is_none());
    assert_eq!(client.state(), ConnectionState::Connected);

    client
        .connect(credentials("token-a"))
        .await
        .expect("already connected");
    assert_eq!(listener.connection_attempts(), 1);
    drop(server);
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_each_subscription_exactly_once() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (spec_a, mut rx_a) = channel("subscription A");
    let (spec_b, mut rx_b) = channel("subscription B");
    client.add_subscription(spec_a);
    client.add_subscription(spec_b);

    let (connected, (mut server, _)) =
        tokio::join!(client.connect(credentials("t")), accept_and_ack(&mut listener));
    connected.expect("connect");
    let first_ids = collect_starts(&mut server, 2).await;
    assert!(server.send_frame(&data(&first_ids["subscription A"], json!(1))));
    assert_eq!(rx_a.recv().await, Some(SubscriptionEvent::Next(json!(1))));

    drop(server);
    let (mut server, _) = accept_and_ack(&mut listener).await;
    let second_ids = collect_starts(&mut server, 2).await;
    assert_ne!(first_ids["subscription A"], second_ids["subscription A"]);
    assert_ne!(first_ids["subscription B"], second_ids["subscription B"]);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.status().reconnect_attempt, 0);

    assert!(server.send_frame(&data(&second_ids["subscription A"], json!(2))));
    assert!(server.send_frame(&data(&second_ids["subscription B"], json!(3))));
    assert_eq!(rx_a.recv().await, Some(SubscriptionEvent::Next(json!(2))));
    assert_eq!(rx_b.recv().await, Some(SubscriptionEvent::Next(json!(3))));
    assert!(rx_a.try_recv().is_err());
    assert!(rx_b.try_recv().is_err());
    assert_eq!(listener.connection_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_rejects_connect_and_schedules_retry() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let silent_server = async {
        let mut server = listener.accept().await.expect("connection");
        assert!(matches!(
            server.recv_frame().await,
            Some(ClientFrame::ConnectionInit { .. })
        ));
        server
    };

    let (result, _server) = tokio::join!(client.connect(credentials("t")), silent_server);
    assert_eq!(
        result,
        Err(ConnectError::HandshakeTimeout(Duration::from_secs(2)))
    );
    let status = client.status();
    assert_eq!(status.state, ConnectionState::Error);
    assert_eq!(status.reconnect_attempt, 1);
    assert!(!status.gave_up);
    assert!(status.last_error.unwrap_or_default().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_are_not_retried() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (spec, mut rx) = channel("subscription A");
    client.add_subscription(spec);

    let rejecting_server = async {
        let mut server = listener.accept().await.expect("connection");
        server.recv_frame().await;
        server.send_frame(&ServerFrame::ConnectionError {
            payload: ErrorPayload {
                errors: vec![ServerError {
                    error_type: Some("UnauthorizedException".to_string()),
                    error_code: Some(401),
                    message: Some("token expired".to_string()),
                }],
            },
        });
        server
    };
    let (result, _server) = tokio::join!(client.connect(credentials("stale")), rejecting_server);
    assert!(matches!(result, Err(ConnectError::Unauthorized(_))));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(listener.connection_attempts(), 1);
    let status = client.status();
    assert!(status.gave_up);
    assert!(status.is_stale());
    assert!(matches!(
        rx.try_recv(),
        Ok(SubscriptionEvent::Error(SubscriptionError::ConnectionLost(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn silence_past_announced_timeout_triggers_reconnect() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let server_with_short_timeout = async {
        let mut server = listener.accept().await.expect("connection");
        server.recv_frame().await;
        assert!(server.ack(Some(5_000)));
        server
    };
    let (connected, server) =
        tokio::join!(client.connect(credentials("t")), server_with_short_timeout);
    connected.expect("connect");

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(server.send_frame(&ServerFrame::Ka));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(client.state(), ConnectionState::Connected);

    let (_second, _) = accept_and_ack(&mut listener).await;
    assert_eq!(listener.connection_attempts(), 2);
    drop(server);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent_and_silences_callbacks() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (connected, (mut server, _)) =
        tokio::join!(client.connect(credentials("t")), accept_and_ack(&mut listener));
    connected.expect("connect");

    let (spec, mut rx) = channel("subscription A");
    client.add_subscription(spec);
    let ids = collect_starts(&mut server, 1).await;
    let id = ids["subscription A"].clone();

    client.disconnect().await;
    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::Stop { id: id.clone() })
    );
    assert_eq!(server.recv_frame().await, None);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    assert!(!server.send_frame(&data(&id, json!(9))));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(listener.connection_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_handshake_cancels_the_pending_connect() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (spec, mut rx) = channel("subscription A");
    client.add_subscription(spec);

    let interrupt = async {
        let mut server = listener.accept().await.expect("connection");
        assert!(matches!(
            server.recv_frame().await,
            Some(ClientFrame::ConnectionInit { .. })
        ));
        client.disconnect().await;
        server
    };
    let (result, mut server) = tokio::join!(client.connect(credentials("t")), interrupt);

    assert_eq!(result, Err(ConnectError::Cancelled));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(server.recv_frame().await, None);
    assert!(!server.ack(None));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(listener.connection_attempts(), 1);
    assert!(listener.try_accept().is_none());
}

#[tokio::test(start_paused = true)]
async fn subscription_errors_stay_scoped() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (spec_a, mut rx_a) = channel("subscription A");
    let (spec_b, mut rx_b) = channel("subscription B");
    client.add_subscription(spec_a);
    client.add_subscription(spec_b);
    let (connected, (mut server, _)) =
        tokio::join!(client.connect(credentials("t")), accept_and_ack(&mut listener));
    connected.expect("connect");
    let ids = collect_starts(&mut server, 2).await;

    assert!(server.send_frame(&ServerFrame::Error {
        id: Some(ids["subscription A"].clone()),
        payload: json!({"errors": [{"message": "resolver failed"}]}),
    }));
    assert!(server.send_frame(&data(&ids["subscription B"], json!("b1"))));
    assert!(server.send_frame(&data(&ids["subscription A"], json!("a1"))));

    assert!(matches!(
        rx_a.recv().await,
        Some(SubscriptionEvent::Error(SubscriptionError::Server { .. }))
    ));
    assert_eq!(rx_b.recv().await, Some(SubscriptionEvent::Next(json!("b1"))));
    assert_eq!(rx_a.recv().await, Some(SubscriptionEvent::Next(json!("a1"))));
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn server_completion_ends_one_stream() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (spec_a, mut rx_a) = channel("subscription A");
    let (spec_b, mut rx_b) = channel("subscription B");
    let key_a = client.add_subscription(spec_a);
    client.add_subscription(spec_b);
    let (connected, (mut server, _)) =
        tokio::join!(client.connect(credentials("t")), accept_and_ack(&mut listener));
    connected.expect("connect");
    let ids = collect_starts(&mut server, 2).await;

    assert!(server.send_frame(&ServerFrame::Complete {
        id: ids["subscription A"].clone(),
    }));
    assert_eq!(rx_a.recv().await, Some(SubscriptionEvent::Complete));

    assert!(server.send_frame(&data(&ids["subscription A"], json!(1))));
    assert!(server.send_frame(&data(&ids["subscription B"], json!(2))));
    assert_eq!(rx_b.recv().await, Some(SubscriptionEvent::Next(json!(2))));
    assert!(rx_a.try_recv().is_err());
    assert!(!client.remove_subscription(key_a).await);
}

#[tokio::test(start_paused = true)]
async fn remove_subscription_sends_stop_once() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (spec, _rx) = channel("subscription A");
    let key = client.add_subscription(spec);
    let (connected, (mut server, _)) =
        tokio::join!(client.connect(credentials("t")), accept_and_ack(&mut listener));
    connected.expect("connect");
    let ids = collect_starts(&mut server, 1).await;

    assert!(client.remove_subscription(key).await);
    assert_eq!(
        server.recv_frame().await,
        Some(ClientFrame::Stop {
            id: ids["subscription A"].clone()
        })
    );
    assert!(!client.remove_subscription(key).await);
}

#[tokio::test(start_paused = true)]
async fn new_credentials_replace_the_session() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (connected, (mut first, _)) =
        tokio::join!(client.connect(credentials("token-a")), accept_and_ack(&mut listener));
    connected.expect("connect a");

    let (connected, (_second, credential)) =
        tokio::join!(client.connect(credentials("token-b")), accept_and_ack(&mut listener));
    connected.expect("connect b");
    assert_eq!(credential, "token-b");
    assert_eq!(first.recv_frame().await, None);
    assert_eq!(listener.connection_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts_until_connect_is_called_again() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    listener.refuse_connections(true);

    let result = client.connect(credentials("t")).await;
    assert!(matches!(result, Err(ConnectError::Transport(_))));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(listener.connection_attempts(), 4);
    assert!(client.status().gave_up);

    listener.refuse_connections(false);
    let (connected, _server) =
        tokio::join!(client.connect(credentials("t")), accept_and_ack(&mut listener));
    connected.expect("fresh connect");
    let status = client.status();
    assert!(!status.gave_up);
    assert_eq!(status.state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn pings_are_answered_with_pongs() {
    let (connector, mut listener) = memory_transport();
    let (client, _task) = RealtimeClient::spawn(connector, options());
    let (connected, (mut server, _)) =
        tokio::join!(client.connect(credentials("t")), accept_and_ack(&mut listener));
    connected.expect("connect");

    assert!(server.ping(vec![1, 2, 3]));
    assert_eq!(
        server.recv().await,
        Some(TransportMessage::Pong(vec![1, 2, 3]))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_task() {
    let (connector, _listener) = memory_transport();
    let (client, task) = RealtimeClient::spawn(connector, options());
    client.shutdown().await;
    task.await.expect("driver task");
    assert_eq!(
        client.connect(credentials("t")).await,
        Err(ConnectError::ClientClosed)
    );
}
