//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use board_gateway::config::GatewayConfig;
use board_gateway::lifecycle::Shutdown;
use board_gateway::routing::RouteTable;
use board_gateway::GatewayServer;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub async fn connect(&self, path: &str) -> WsStream {
        let (ws, _) = connect_async(self.url(path)).await.unwrap();
        ws
    }
}

/// Config with a short shutdown grace period.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.shutdown_grace_secs = 1;
    config.observability.metrics_enabled = false;
    config
}

pub async fn start(config: GatewayConfig, table: RouteTable) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = GatewayServer::new(&config, table, shutdown.clone());
    let task = tokio::spawn(server.run(listener));
    TestGateway { addr, shutdown, task }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

pub async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
pub async fn recv_json(ws: &mut WsStream) -> Value {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(Message::Close(frame))) => panic!("socket closed while waiting for a frame: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(error)) => panic!("socket error: {error}"),
                None => panic!("socket ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Next frame with the given event name, skipping others.
pub async fn recv_event(ws: &mut WsStream, event: &str) -> Value {
    loop {
        let frame = recv_json(ws).await;
        if frame["event"] == event {
            return frame;
        }
    }
}

/// Read until the server closes; returns its close frame.
pub async fn recv_close(ws: &mut WsStream) -> Option<CloseFrame> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("timed out waiting for close")
}
