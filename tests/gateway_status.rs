// tests/gateway_status.rs

mod common;
use crate::common::{TestResult, init_tracing, with_timeout};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use hotrun::config::HubSettings;
use hotrun::errors::HotrunError;
use hotrun::gateway::{self, GatewayState};
use hotrun::hub::BroadcastHub;
use hotrun::supervisor::{GenerationStatus, SupervisorState, SupervisorStatus};
use hotrun::types::OverflowPolicy;

async fn http_get(addr: SocketAddr, path: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

#[tokio::test]
async fn status_endpoint_reports_supervisor_state_and_shutdown_closes_hub() -> TestResult {
    init_tracing();
    let hub = BroadcastHub::spawn(HubSettings {
        queue_capacity: 8,
        overflow: OverflowPolicy::DropOldest,
    });
    let (status_tx, status_rx) = watch::channel(SupervisorStatus::default());
    let state = Arc::new(GatewayState {
        hub: hub.clone(),
        status: status_rx,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(gateway::serve(listener, state, shutdown.clone()));

    let idle = with_timeout(http_get(addr, "/")).await?;
    assert!(idle.starts_with("HTTP/1.1 200"), "response: {idle}");
    assert!(idle.contains(r#""state":"idle""#), "response: {idle}");
    assert!(idle.contains(r#""generation":null"#), "response: {idle}");

    let _observer = hub.register().await?;
    status_tx.send_replace(SupervisorStatus {
        state: SupervisorState::Running,
        generation: Some(3),
        last_status: Some(GenerationStatus::Running),
    });

    let running = with_timeout(http_get(addr, "/")).await?;
    assert!(running.contains(r#""state":"running""#), "response: {running}");
    assert!(running.contains(r#""generation":3"#), "response: {running}");
    assert!(running.contains(r#""observers":1"#), "response: {running}");

    shutdown.cancel();
    with_timeout(server).await??;

    assert!(matches!(hub.register().await, Err(HotrunError::HubClosed)));
    Ok(())
}

#[tokio::test]
async fn plain_get_on_ws_route_is_not_upgraded() -> TestResult {
    init_tracing();
    let hub = BroadcastHub::spawn(HubSettings {
        queue_capacity: 8,
        overflow: OverflowPolicy::DropOldest,
    });
    let (_status_tx, status_rx) = watch::channel(SupervisorStatus::default());
    let state = Arc::new(GatewayState {
        hub: hub.clone(),
        status: status_rx,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(gateway::serve(listener, state, shutdown.clone()));

    // Missing upgrade headers are rejected by the extractor.
    let response = with_timeout(http_get(addr, "/ws")).await?;
    assert!(!response.starts_with("HTTP/1.1 101"), "response: {response}");
    assert!(!response.starts_with("HTTP/1.1 200"), "response: {response}");

    shutdown.cancel();
    with_timeout(server).await??;
    Ok(())
}

type Client = tungstenite::WebSocket<std::net::TcpStream>;

/// Blocking websocket handshake against `/ws`; returns once the gateway has
/// registered the observer.
fn connect_ws(addr: SocketAddr) -> Result<Client, String> {
    let stream = std::net::TcpStream::connect(addr).map_err(|e| e.to_string())?;
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(5)))
        .map_err(|e| e.to_string())?;
    let url = format!("ws://{addr}/ws");
    let (socket, _response) = tungstenite::client(url.as_str(), stream)
        .ok()
        .ok_or_else(|| "websocket handshake failed".to_string())?;
    Ok(socket)
}

/// Next `n` data frames, skipping control frames.
fn read_frames(socket: &mut Client, n: usize) -> Result<Vec<tungstenite::Message>, String> {
    let mut frames = Vec::new();
    while frames.len() < n {
        match socket.read().map_err(|e| e.to_string())? {
            msg @ (tungstenite::Message::Text(_) | tungstenite::Message::Binary(_)) => {
                frames.push(msg)
            }
            tungstenite::Message::Close(_) => return Err("closed early".to_string()),
            _ => {}
        }
    }
    Ok(frames)
}

#[tokio::test]
async fn websocket_gets_one_frame_per_publish_without_history() -> TestResult {
    init_tracing();
    let hub = BroadcastHub::spawn(HubSettings {
        queue_capacity: 8,
        overflow: OverflowPolicy::DropOldest,
    });
    let (_status_tx, status_rx) = watch::channel(SupervisorStatus::default());
    let state = Arc::new(GatewayState {
        hub: hub.clone(),
        status: status_rx,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(gateway::serve(listener, state, shutdown.clone()));

    hub.publish("before connect\n");
    let mut socket = with_timeout(tokio::task::spawn_blocking(move || connect_ws(addr))).await??;

    hub.publish("hello\n");
    hub.publish(bytes::Bytes::from_static(&[0xff, 0xfe, b'\n']));
    hub.publish("bye\n");

    let (mut socket, frames) = with_timeout(tokio::task::spawn_blocking(move || {
        let frames = read_frames(&mut socket, 3);
        (socket, frames)
    }))
    .await?;
    let frames = frames?;

    match &frames[0] {
        tungstenite::Message::Text(text) => assert_eq!(text.as_str(), "hello\n"),
        other => panic!("expected text frame, got {other:?}"),
    }
    match &frames[1] {
        tungstenite::Message::Binary(raw) => assert_eq!(&raw[..], &[0xff, 0xfe, b'\n']),
        other => panic!("expected binary frame, got {other:?}"),
    }
    match &frames[2] {
        tungstenite::Message::Text(text) => assert_eq!(text.as_str(), "bye\n"),
        other => panic!("expected text frame, got {other:?}"),
    }

    // Shutdown closes the hub, which ends the socket with a close frame.
    shutdown.cancel();
    let ended = with_timeout(tokio::task::spawn_blocking(move || loop {
        match socket.read() {
            Ok(tungstenite::Message::Close(_)) | Err(_) => return true,
            Ok(tungstenite::Message::Text(_) | tungstenite::Message::Binary(_)) => return false,
            Ok(_) => {}
        }
    }))
    .await?;
    assert!(ended, "socket delivered data after shutdown");

    with_timeout(server).await??;
    Ok(())
}
