//! Fake gateway and session fixtures used by the transport and session
//! tests.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

use crate::host::{ChannelSink, HostEvent};
use crate::protocol::DeviceOptions;
use crate::session::Session;

/// Upper bound for any single step of a test.
pub(crate) const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a log subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Filters used by every test session.
pub(crate) fn test_options() -> DeviceOptions {
    DeviceOptions::services([0xf005_u16])
}

/// Builds a `microbit` session against `url`, wired to a channel sink.
pub(crate) fn session_for(url: &str) -> (Session, mpsc::UnboundedReceiver<HostEvent>) {
    init_tracing();
    let (sink, events) = ChannelSink::new();
    let session = Session::builder()
        .extension_id("microbit")
        .device_options(test_options())
        .sink(sink)
        .gateway_url(url)
        .build()
        .expect("valid test session");
    (session, events)
}

/// Waits for the next host event.
pub(crate) async fn next_event(events: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
    timeout(STEP_TIMEOUT, events.recv())
        .await
        .expect("host event in time")
        .expect("sink alive")
}

/// Returns a loopback port with nothing listening on it.
pub(crate) async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}

/// A local WebSocket server standing in for the hardware gateway.
pub(crate) struct FakeGateway {
    listener: TcpListener,
    url: String,
}

impl FakeGateway {
    /// Binds to a random loopback port.
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake gateway");
        let port = listener.local_addr().expect("local addr").port();
        Self {
            listener,
            url: format!("ws://127.0.0.1:{port}/scratch/ble"),
        }
    }

    /// Returns the `ws://` URL clients should use.
    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Accepts one client and completes the upgrade.
    pub(crate) async fn accept(&self) -> GatewayPeer {
        let (stream, _) = timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client connected in time")
            .expect("accept");
        let ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
        GatewayPeer { ws }
    }
}

/// Server side of one accepted connection.
pub(crate) struct GatewayPeer {
    ws: WebSocketStream<TcpStream>,
}

impl GatewayPeer {
    /// Receives the next text frame, or `None` if nothing arrives in time
    /// or the client went away.
    pub(crate) async fn try_recv_text(&mut self, within: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let next = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            match next {
                Ok(Message::Text(text)) => return Some(text.as_str().to_string()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Receives the next text frame.
    pub(crate) async fn recv_text(&mut self) -> String {
        self.try_recv_text(STEP_TIMEOUT)
            .await
            .expect("expected a frame from the client")
    }

    /// Receives and parses the next frame.
    pub(crate) async fn recv_json(&mut self) -> Value {
        serde_json::from_str(&self.recv_text().await).expect("client sent JSON")
    }

    /// Parses the next frame if one arrives within `within`.
    pub(crate) async fn try_recv_json(&mut self, within: Duration) -> Option<Value> {
        self.try_recv_text(within)
            .await
            .map(|text| serde_json::from_str(&text).expect("client sent JSON"))
    }

    /// Sends a raw text frame.
    pub(crate) async fn send_text(&mut self, text: impl Into<String>) {
        self.ws
            .send(Message::Text(text.into().into()))
            .await
            .expect("send to client");
    }

    /// Sends a JSON frame.
    pub(crate) async fn send_json(&mut self, value: Value) {
        self.send_text(value.to_string()).await;
    }

    /// Answers a call with a result.
    pub(crate) async fn reply(&mut self, id: &Value, result: Value) {
        self.send_json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await;
    }

    /// Rejects a call with an error object.
    pub(crate) async fn reject(&mut self, id: &Value, code: i64, message: &str) {
        self.send_json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    /// Sends a notification (no id).
    pub(crate) async fn notify(&mut self, method: &str, params: Value) {
        self.send_json(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    /// Closes the connection from the gateway side.
    pub(crate) async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
