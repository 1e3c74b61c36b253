//! Client Integration Tests
//!
//! Exercises the framed transport, command client, and stream client against
//! a fake in-process TCP peer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use xapi_client::{
    Command, CommandClient, DecodeBuffer, Directive, Endpoint, FrameError, FramedTransport,
    HandlerTable, SessionToken, StreamClient, TransportError, TransportSettings,
};

/// Settings tuned for tests: single attempt, no pacing delay.
fn test_settings() -> TransportSettings {
    TransportSettings {
        max_connect_attempts: 1,
        retry_delay: Duration::from_millis(10),
        send_pacing: Duration::ZERO,
        ..TransportSettings::default()
    }
}

fn endpoint_for(listener: &TcpListener) -> Endpoint {
    let addr = listener.local_addr().unwrap();
    Endpoint::new(addr.ip().to_string(), addr.port(), false)
}

/// Read one complete JSON value from the fake peer's side of the socket.
async fn read_json(stream: &mut TcpStream, buffer: &mut DecodeBuffer) -> Value {
    use tokio::io::AsyncReadExt;

    loop {
        if let Some(value) = buffer.extract().unwrap() {
            return value;
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer saw EOF while awaiting a message");
        buffer.feed(&chunk[..n]).unwrap();
    }
}

// =============================================================================
// Bounded retry
// =============================================================================

#[tokio::test]
async fn bounded_retry_makes_exactly_the_configured_attempts() {
    // Bind then drop to get a port that refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);
    drop(listener);

    let settings = TransportSettings {
        max_connect_attempts: 3,
        retry_delay: Duration::from_millis(20),
        ..test_settings()
    };

    let started = std::time::Instant::now();
    let result = FramedTransport::connect(&endpoint, &settings).await;

    match result {
        Err(TransportError::ConnectionExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected ConnectionExhausted, got {other:?}"),
    }

    // Two inter-attempt delays between three attempts.
    assert!(started.elapsed() >= Duration::from_millis(40));
}

// =============================================================================
// Command channel
// =============================================================================

#[tokio::test]
async fn execute_returns_response_split_across_reads() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buffer = DecodeBuffer::new();

        let request = read_json(&mut socket, &mut buffer).await;

        let response = br#"{"status":true,"returnData":{"version":"2.5.0"}}"#;
        let (head, tail) = response.split_at(response.len() / 2);
        socket.write_all(head).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        socket.write_all(tail).await.unwrap();

        request
    });

    let mut client = CommandClient::connect(&endpoint, &test_settings())
        .await
        .unwrap();
    let response = client.execute(&Command::new("getVersion")).await.unwrap();
    client.disconnect().await;

    assert_eq!(response["status"], true);
    assert_eq!(response["returnData"]["version"], "2.5.0");

    let request = server.await.unwrap();
    assert_eq!(request, json!({"command": "getVersion", "arguments": {}}));
}

#[tokio::test]
async fn two_responses_in_one_write_arrive_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(br#"{"seq":1} {"seq":2}"#)
            .await
            .unwrap();
        // Hold the socket open until the client is done.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let mut transport = FramedTransport::connect(&endpoint, &test_settings())
        .await
        .unwrap();

    let first = transport.receive().await.unwrap();
    let second = transport.receive().await.unwrap();
    assert_eq!(first["seq"], 1);
    assert_eq!(second["seq"], 2);

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn operations_after_close_fail_cleanly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);

    let server = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let mut transport = FramedTransport::connect(&endpoint, &test_settings())
        .await
        .unwrap();

    transport.close().await;
    transport.close().await; // idempotent

    assert!(matches!(
        transport.send(&json!({"command": "ping"})).await,
        Err(TransportError::Closed)
    ));
    assert!(matches!(
        transport.receive().await,
        Err(TransportError::Closed)
    ));

    server.await.unwrap();
}

#[tokio::test]
async fn stalled_peer_overruns_buffer_limit() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        // An opened string that never completes a value.
        socket.write_all(b"{\"pad\":\"").await.unwrap();
        socket.write_all(&[b'a'; 256]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let settings = TransportSettings {
        max_buffered_bytes: 64,
        ..test_settings()
    };
    let mut transport = FramedTransport::connect(&endpoint, &settings).await.unwrap();

    let result = timeout(Duration::from_secs(1), transport.receive())
        .await
        .expect("receive must fail, not wait forever");
    assert!(matches!(
        result,
        Err(TransportError::Frame(FrameError::Overflow { limit: 64 }))
    ));

    server.await.unwrap();
}

// =============================================================================
// Streaming channel
// =============================================================================

#[tokio::test]
async fn stream_dispatches_pushes_to_registered_handlers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buffer = DecodeBuffer::new();

        // First the subscribe directive, then three pushes: one routed, one
        // unknown, one routed again.
        let directive = read_json(&mut socket, &mut buffer).await;
        socket
            .write_all(
                br#"{"command":"tickPrices","data":{"symbol":"EURUSD","ask":1.1}}{"command":"mystery"}{"command":"trade","data":{"order":7}}"#,
            )
            .await
            .unwrap();

        // Hold the socket open until the client disconnects.
        tokio::time::sleep(Duration::from_millis(500)).await;
        directive
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    let tick_tx = tx.clone();
    let handlers = HandlerTable::new()
        .on("tickPrices", move |msg| {
            tick_tx.send(msg.clone()).ok();
        })
        .on("trade", move |msg| {
            tx.send(msg.clone()).ok();
        });

    let mut stream = StreamClient::connect(
        &endpoint,
        &test_settings(),
        SessionToken::new("sess-42"),
        handlers,
    )
    .await
    .unwrap();

    stream
        .subscribe(Directive::new("getTickPrices").with_param("symbol", "EURUSD"))
        .await
        .unwrap();

    let tick = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick["command"], "tickPrices");
    assert_eq!(tick["data"]["ask"], 1.1);

    // The unknown push is dropped silently; the next routed push still
    // arrives, in order.
    let trade = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trade["command"], "trade");
    assert_eq!(trade["data"]["order"], 7);

    stream.disconnect().await;

    let directive = server.await.unwrap();
    assert_eq!(
        directive,
        json!({
            "command": "getTickPrices",
            "streamSessionId": "sess-42",
            "symbol": "EURUSD",
        })
    );
}

#[tokio::test]
async fn disconnect_is_prompt_with_no_inbound_traffic() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);

    let server = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        // Send nothing; the listener sits in a pending read.
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let stream = StreamClient::connect(
        &endpoint,
        &test_settings(),
        SessionToken::new("sess-1"),
        HandlerTable::new(),
    )
    .await
    .unwrap();

    timeout(Duration::from_millis(500), stream.disconnect())
        .await
        .expect("disconnect must not wait for the next message");

    server.abort();
}

#[tokio::test]
async fn listener_stops_when_peer_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = endpoint_for(&listener);

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
    });

    let stream = StreamClient::connect(
        &endpoint,
        &test_settings(),
        SessionToken::new("sess-1"),
        HandlerTable::new(),
    )
    .await
    .unwrap();

    server.await.unwrap();

    // The listener observed EOF and exited; disconnect still completes.
    timeout(Duration::from_millis(500), stream.disconnect())
        .await
        .expect("disconnect after peer close must complete");
}
