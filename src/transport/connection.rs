//! WebSocket connection and event loop.
//!
//! This module handles the connection to the gateway, including
//! request/response correlation and routing of gateway-initiated calls.
//!
//! # Event Loop
//!
//! [`Connection::open`] spawns a tokio task that:
//!
//! - Performs the handshake, buffering calls issued in the meantime
//! - Flushes buffered calls in issue order once the socket is usable
//! - Matches replies to pending calls by id, running each call's
//!   completion hook before its caller sees the result
//! - Hands inbound calls to the notification handler and sends its reply
//! - Fails every pending call when the socket closes or errors

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, to_string};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Incoming, Reply, Request};

use super::connector::{Connector, GatewayStream};

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to pending calls.
type CorrelationMap = FxHashMap<RequestId, PendingCall>;

/// Write half of the gateway socket.
type GatewaySink = SplitSink<GatewayStream, Message>;

/// Handler for gateway-initiated calls.
///
/// Receives the method name and params. Return `Some(value)` to answer the
/// call with that result.
pub type NotificationHandler = Box<dyn Fn(&str, Value) -> Option<Value> + Send + Sync>;

/// Single-fire callback run once the link reaches [`LinkState::Closed`].
///
/// Receives `None` for a requested shutdown and the failure otherwise.
pub type CloseHandler = Box<dyn FnOnce(Option<Error>) + Send>;

/// Hook run when a call resolves, whether or not its [`PendingReply`] is
/// still awaited.
///
/// Receives the outcome and returns what the caller will see. Runs on the
/// event loop for replies and transport failures, and inline in
/// [`Connection::call_with_hook`] when the link is already gone. It must not
/// block.
pub type CompletionHook = Box<dyn FnOnce(Result<Value>) -> Result<Value> + Send>;

/// One call awaiting its reply.
struct PendingCall {
    reply_tx: oneshot::Sender<Result<Value>>,
    on_complete: Option<CompletionHook>,
}

impl PendingCall {
    /// Runs the hook, then hands the outcome to the caller.
    fn complete(self, result: Result<Value>) {
        let result = match self.on_complete {
            Some(hook) => hook(result),
            None => result,
        };
        // Caller may have stopped waiting
        let _ = self.reply_tx.send(result);
    }
}

// ============================================================================
// LinkState
// ============================================================================

/// Lifecycle of the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, [`Connection::open`] not called yet.
    Idle,
    /// Handshake in flight.
    Opening,
    /// Socket usable.
    Open,
    /// Terminal.
    Closed(CloseReason),
}

/// Why the link closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Connection::shutdown`] was called or every handle was dropped.
    Requested,
    /// The gateway did not accept the connection before the deadline.
    OpenTimeout {
        /// Deadline that expired.
        timeout_ms: u64,
    },
    /// Refused, closed by the gateway, or a socket error.
    Failed,
}

impl CloseReason {
    fn from_failure(failure: Option<&Error>) -> Self {
        match failure {
            None => Self::Requested,
            Some(Error::ConnectionTimeout { timeout_ms }) => Self::OpenTimeout {
                timeout_ms: *timeout_ms,
            },
            Some(_) => Self::Failed,
        }
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a request; its reply channel is already in the correlation map.
    Send(Request),
    /// Close the socket.
    Shutdown,
}

/// Everything the event loop takes ownership of when spawned.
struct Startup {
    connector: Connector,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    link_tx: watch::Sender<LinkState>,
}

// ============================================================================
// PendingReply
// ============================================================================

/// Future resolving to the reply of one call.
///
/// Resolves exactly once: with the gateway's result, with its error, or
/// with [`Error::ConnectionClosed`] if the link goes down first.
#[derive(Debug)]
#[must_use = "a call's reply is only observed by awaiting it"]
pub struct PendingReply {
    id: Option<RequestId>,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    /// Creates a reply that is already resolved, for a call never issued.
    pub(crate) fn resolved(result: Result<Value>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { id: None, rx }
    }

    /// Returns the correlation id, if the call was issued.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(Error::ConnectionClosed)))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// JSON-RPC connection to the gateway.
///
/// Handles request/response correlation and inbound call routing. The
/// connection spawns its event loop on [`open`](Self::open); calls made
/// before that are held and sent in order once the socket is usable.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone. All clones share one
/// socket.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Inbound call handler (shared with event loop).
    notification_handler: Arc<Mutex<Option<NotificationHandler>>>,
    /// Close handler, taken on close.
    close_handler: Arc<Mutex<Option<CloseHandler>>>,
    /// Next correlation id.
    next_id: Arc<AtomicU64>,
    /// Observed link state.
    link_rx: watch::Receiver<LinkState>,
    /// Event loop inputs, present until opened.
    startup: Arc<Mutex<Option<Startup>>>,
}

impl Connection {
    /// Creates an idle connection for the given connector.
    #[must_use]
    pub fn new(connector: Connector) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = watch::channel(LinkState::Idle);

        Self {
            command_tx,
            correlation: Arc::new(Mutex::new(CorrelationMap::default())),
            notification_handler: Arc::new(Mutex::new(None)),
            close_handler: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
            link_rx,
            startup: Arc::new(Mutex::new(Some(Startup {
                connector,
                command_rx,
                link_tx,
            }))),
        }
    }

    /// Starts the handshake and the event loop.
    ///
    /// Returns immediately; use [`wait_open`](Self::wait_open) to observe
    /// the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if called twice or outside a tokio
    /// runtime.
    pub fn open(&self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::invalid_state("open requires a tokio runtime"))?;

        let startup = self
            .startup
            .lock()
            .take()
            .ok_or_else(|| Error::invalid_state("connection was already opened or shut down"))?;

        startup.link_tx.send_replace(LinkState::Opening);
        debug!(url = %startup.connector.url(), "Opening gateway connection");

        handle.spawn(Self::run_event_loop(
            startup,
            Arc::clone(&self.correlation),
            Arc::clone(&self.notification_handler),
            Arc::clone(&self.close_handler),
        ));

        Ok(())
    }

    /// Waits until the socket is usable.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the open deadline expired
    /// - [`Error::ConnectionClosed`] if the link closed for any other reason
    pub async fn wait_open(&self) -> Result<()> {
        let mut link_rx = self.link_rx.clone();
        let state = *link_rx
            .wait_for(|state| matches!(state, LinkState::Open | LinkState::Closed(_)))
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        match state {
            LinkState::Open => Ok(()),
            LinkState::Closed(CloseReason::OpenTimeout { timeout_ms }) => {
                Err(Error::connection_timeout(timeout_ms))
            }
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Returns the current link state.
    #[inline]
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        *self.link_rx.borrow()
    }

    /// Sets the handler for gateway-initiated calls.
    ///
    /// The handler runs on the event loop; it must not call back into
    /// [`set_notification_handler`](Self::set_notification_handler).
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.lock() = Some(handler);
    }

    /// Sets the single-fire close handler.
    pub fn set_close_handler(&self, handler: CloseHandler) {
        *self.close_handler.lock() = Some(handler);
    }

    /// Issues a call.
    ///
    /// The id is allocated and the pending entry recorded before this
    /// returns, so ids follow call order. No timeout is applied.
    pub fn call(&self, method: &str, params: Value) -> PendingReply {
        self.issue(method, params, None).1
    }

    /// Issues a call whose outcome is also handed to `on_complete`.
    ///
    /// The hook runs exactly once, before the returned reply resolves, even
    /// if the reply is dropped. See [`CompletionHook`].
    pub fn call_with_hook(
        &self,
        method: &str,
        params: Value,
        on_complete: CompletionHook,
    ) -> PendingReply {
        self.issue(method, params, Some(on_complete)).1
    }

    fn issue(
        &self,
        method: &str,
        params: Value,
        on_complete: Option<CompletionHook>,
    ) -> (RequestId, PendingReply) {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, rx) = oneshot::channel();

        self.correlation.lock().insert(
            id,
            PendingCall {
                reply_tx,
                on_complete,
            },
        );

        let request = Request::new(id, method, params);
        if self.command_tx.send(ConnectionCommand::Send(request)).is_err() {
            // Loop is gone; the hook must run without the map locked
            let pending = self.correlation.lock().remove(&id);
            if let Some(pending) = pending {
                pending.complete(Err(Error::ConnectionClosed));
            }
        }

        trace!(%id, method, "Call issued");

        (id, PendingReply { id: Some(id), rx })
    }

    /// Issues a call and bounds the wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTimeout`] carrying the call's id if no reply
    /// arrives in time; the pending entry is removed and a late reply is
    /// dropped.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let (id, reply) = self.issue(method, params, None);

        match timeout(request_timeout, reply).await {
            Ok(result) => result,
            Err(_) => {
                self.correlation.lock().remove(&id);
                Err(Error::request_timeout(
                    id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Returns the number of calls awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Closes the connection.
    ///
    /// Abandons a handshake still in flight. Pending calls fail with
    /// [`Error::ConnectionClosed`]; the close handler sees `None`.
    pub fn shutdown(&self) {
        let startup = self.startup.lock().take();

        match startup {
            Some(Startup {
                mut command_rx,
                link_tx,
                ..
            }) => {
                command_rx.close();
                Self::finish(&link_tx, &self.correlation, &self.close_handler, None);
            }
            None => {
                let _ = self.command_tx.send(ConnectionCommand::Shutdown);
            }
        }
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        startup: Startup,
        correlation: Arc<Mutex<CorrelationMap>>,
        notification_handler: Arc<Mutex<Option<NotificationHandler>>>,
        close_handler: Arc<Mutex<Option<CloseHandler>>>,
    ) {
        let Startup {
            connector,
            mut command_rx,
            link_tx,
        } = startup;

        let failure = match Self::await_open(&connector, &mut command_rx).await {
            Ok(Some((ws_stream, queued))) => {
                link_tx.send_replace(LinkState::Open);
                info!(url = %connector.url(), queued = queued.len(), "Gateway connection open");

                Self::pump(
                    ws_stream,
                    queued,
                    &mut command_rx,
                    &correlation,
                    &notification_handler,
                )
                .await
            }
            Ok(None) => None,
            Err(e) => {
                warn!(url = %connector.url(), error = %e, "Gateway connection failed to open");
                Some(e)
            }
        };

        command_rx.close();
        Self::finish(&link_tx, &correlation, &close_handler, failure);

        debug!("Event loop terminated");
    }

    /// Runs the handshake while buffering calls.
    ///
    /// Returns `Ok(None)` if shutdown was requested first.
    async fn await_open(
        connector: &Connector,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> Result<Option<(GatewayStream, Vec<Request>)>> {
        let mut queued = Vec::new();
        let open = connector.open();
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => {
                    return result.map(|ws_stream| Some((ws_stream, queued)));
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(request)) => {
                            trace!(id = %request.id, "Call held until open");
                            queued.push(request);
                        }

                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!("Open abandoned");
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    /// Drives an open socket until it closes.
    ///
    /// Returns the failure, or `None` for a requested shutdown.
    async fn pump(
        ws_stream: GatewayStream,
        queued: Vec<Request>,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: &Arc<Mutex<CorrelationMap>>,
        notification_handler: &Arc<Mutex<Option<NotificationHandler>>>,
    ) -> Option<Error> {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        for request in queued {
            if let Err(e) = Self::handle_send_command(request, &mut ws_write, correlation).await {
                return Some(e);
            }
        }

        loop {
            tokio::select! {
                // Incoming frames from the gateway
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let reply = Self::handle_incoming_message(
                                &text,
                                correlation,
                                notification_handler,
                            );

                            if let Some(reply) = reply {
                                match to_string(&reply) {
                                    Ok(json) => {
                                        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                            warn!(error = %e, "Failed to send reply");
                                            return Some(e.into());
                                        }
                                    }
                                    Err(e) => warn!(error = %e, "Failed to serialize reply"),
                                }
                            }
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by gateway");
                            return Some(Error::ConnectionClosed);
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            return Some(e.into());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            return Some(Error::ConnectionClosed);
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Calls from the session
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(request)) => {
                            if let Err(e) = Self::handle_send_command(request, &mut ws_write, correlation).await {
                                return Some(e);
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            return None;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Handles an incoming text frame from the gateway.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        notification_handler: &Arc<Mutex<Option<NotificationHandler>>>,
    ) -> Option<Reply> {
        match Incoming::decode(text) {
            Ok(Incoming::Response(response)) => {
                let id = response.id;
                let pending = correlation.lock().remove(&id);

                if let Some(pending) = pending {
                    pending.complete(response.into_result());
                    trace!(%id, "Reply matched");
                } else {
                    warn!(%id, "Reply for unknown or completed request");
                }

                None
            }

            Ok(Incoming::Call(call)) => {
                let guard = notification_handler.lock();
                let handler = guard.as_ref()?;
                let result = handler(&call.method, call.params)?;
                Some(Reply::new(call.id, result))
            }

            Err(e) => {
                warn!(error = %e, text = %text, "Dropping undecodable frame");
                None
            }
        }
    }

    /// Sends one request over the socket.
    ///
    /// A socket failure fails this call and is returned so the loop stops.
    async fn handle_send_command(
        request: Request,
        ws_write: &mut GatewaySink,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) -> Result<()> {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let pending = correlation.lock().remove(&request_id);
                if let Some(pending) = pending {
                    pending.complete(Err(Error::Json(e)));
                }
                return Ok(());
            }
        };

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            let pending = correlation.lock().remove(&request_id);
            if let Some(pending) = pending {
                pending.complete(Err(Error::ConnectionClosed));
            }
            return Err(e.into());
        }

        trace!(%request_id, method = %request.method, "Request sent");
        Ok(())
    }

    /// Publishes `Closed`, fails pending calls, then runs the close handler.
    fn finish(
        link_tx: &watch::Sender<LinkState>,
        correlation: &Arc<Mutex<CorrelationMap>>,
        close_handler: &Arc<Mutex<Option<CloseHandler>>>,
        failure: Option<Error>,
    ) {
        link_tx.send_replace(LinkState::Closed(CloseReason::from_failure(failure.as_ref())));
        Self::fail_pending_requests(correlation);

        let handler = close_handler.lock().take();
        if let Some(handler) = handler {
            handler(failure);
        }
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, call) in pending {
            call.complete(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready_err, task};

    use crate::test_support::{FakeGateway, STEP_TIMEOUT};

    fn connection_for(gateway: &FakeGateway) -> Connection {
        Connection::new(Connector::new(gateway.url()).expect("valid url"))
    }

    #[test]
    fn test_call_before_open_stays_pending_until_shutdown() {
        let connection = Connection::new(Connector::new("ws://127.0.0.1:9").expect("valid"));
        let mut reply = task::spawn(connection.call("discover", json!({})));

        assert_pending!(reply.poll());
        assert_eq!(connection.pending_count(), 1);

        connection.shutdown();

        assert!(reply.is_woken());
        assert_ready_err!(reply.poll());
        assert_eq!(connection.pending_count(), 0);
        assert_eq!(connection.link_state(), LinkState::Closed(CloseReason::Requested));
    }

    #[test]
    fn test_open_outside_runtime_is_rejected() {
        let connection = Connection::new(Connector::new("ws://127.0.0.1:9").expect("valid"));
        let err = connection.open().unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(connection.link_state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_wire_format() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;
        connection.wait_open().await.expect("open");

        let _first = connection.call("discover", json!({"filters": []}));
        let _second = connection.call("connect", json!({"peripheralId": "p"}));

        assert_eq!(
            peer.recv_text().await,
            r#"{"jsonrpc":"2.0","id":1,"method":"discover","params":{"filters":[]}}"#
        );
        let second = peer.recv_json().await;
        assert_eq!(second["id"], 2);
        assert_eq!(second["method"], "connect");
    }

    #[tokio::test]
    async fn test_calls_before_open_are_flushed_in_order() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);

        let first = connection.call("read", json!({"n": 1}));
        let second = connection.call("write", json!({"n": 2}));
        assert_eq!(connection.link_state(), LinkState::Idle);

        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let a = peer.recv_json().await;
        let b = peer.recv_json().await;
        assert_eq!(a["method"], "read");
        assert_eq!(b["method"], "write");

        peer.reply(&a["id"], json!("r")).await;
        peer.reply(&b["id"], json!("w")).await;

        assert_eq!(first.await.expect("read reply"), json!("r"));
        assert_eq!(second.await.expect("write reply"), json!("w"));
    }

    #[tokio::test]
    async fn test_out_of_order_replies_are_not_swapped() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let first = connection.call("read", json!({}));
        let second = connection.call("write", json!({}));

        let a = peer.recv_json().await;
        let b = peer.recv_json().await;

        // Reply to the later call first
        peer.reply(&b["id"], json!({"which": "second"})).await;
        peer.reply(&a["id"], json!({"which": "first"})).await;

        assert_eq!(second.await.expect("second")["which"], "second");
        assert_eq!(first.await.expect("first")["which"], "first");
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_rejects_call() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let reply = connection.call("connect", json!({"peripheralId": "nope"}));
        let request = peer.recv_json().await;
        peer.reject(&request["id"], -32602, "unknown peripheral").await;

        let err = reply.await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_unknown_reply_id_is_dropped() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let reply = connection.call("read", json!({}));
        let request = peer.recv_json().await;

        peer.reply(&json!(999), json!("stray")).await;
        peer.send_text("garbage").await;
        peer.reply(&request["id"], json!("real")).await;

        assert_eq!(reply.await.expect("reply"), json!("real"));
        assert_eq!(connection.link_state(), LinkState::Open);
    }

    #[tokio::test]
    async fn test_remote_close_fails_all_pending() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);

        let (closed_tx, closed_rx) = oneshot::channel();
        connection.set_close_handler(Box::new(move |failure| {
            let _ = closed_tx.send(failure.map(|e| e.is_connection_error()));
        }));

        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let read = connection.call("read", json!({}));
        let write = connection.call("write", json!({}));
        peer.recv_json().await;
        peer.recv_json().await;
        assert_eq!(connection.pending_count(), 2);

        peer.close().await;

        assert!(matches!(read.await, Err(Error::ConnectionClosed)));
        assert!(matches!(write.await, Err(Error::ConnectionClosed)));
        assert_eq!(connection.pending_count(), 0);

        let failure = timeout(STEP_TIMEOUT, closed_rx).await.expect("close handler ran");
        assert_eq!(failure.expect("sender kept"), Some(true));
        assert_eq!(connection.link_state(), LinkState::Closed(CloseReason::Failed));
    }

    #[tokio::test]
    async fn test_call_after_close_fails_immediately() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let peer = gateway.accept().await;
        connection.wait_open().await.expect("open");

        peer.close().await;
        let mut link_rx = connection.link_rx.clone();
        link_rx
            .wait_for(|state| matches!(state, LinkState::Closed(_)))
            .await
            .expect("link closes");

        let err = connection.call("read", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_notification_handler_reply_is_sent() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.set_notification_handler(Box::new(|method: &str, _params: Value| {
            (method == "ping").then(|| json!(42))
        }));
        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        peer.send_json(json!({"jsonrpc": "2.0", "id": 77, "method": "ping"})).await;
        assert_eq!(peer.recv_text().await, r#"{"jsonrpc":"2.0","id":77,"result":42}"#);

        peer.notify("somethingElse", json!({})).await;
        assert!(peer.try_recv_json(Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn test_open_timeout_fails_queued_calls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let connector = Connector::new(&format!("ws://127.0.0.1:{port}"))
            .expect("valid")
            .with_open_timeout(Some(Duration::from_millis(100)));
        let connection = Connection::new(connector);

        let reply = connection.call("discover", json!({}));
        connection.open().expect("open");

        let err = connection.wait_open().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 100 }));
        assert!(matches!(reply.await, Err(Error::ConnectionClosed)));
        assert_eq!(
            connection.link_state(),
            LinkState::Closed(CloseReason::OpenTimeout { timeout_ms: 100 })
        );
        drop(listener);
    }

    #[tokio::test]
    async fn test_double_open_is_rejected() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("first open");

        let err = connection.open().unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_call_with_timeout_removes_entry() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let err = connection
            .call_with_timeout("read", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert_eq!(connection.pending_count(), 0);

        // The error names the id that went on the wire
        let request = peer.recv_json().await;
        let Error::RequestTimeout { request_id, timeout_ms } = err else {
            panic!("expected request timeout, got {err:?}");
        };
        assert_eq!(timeout_ms, 50);
        assert_eq!(json!(request_id.as_u64()), request["id"]);

        // Late reply is dropped without disturbing the link
        peer.reply(&request["id"], json!(null)).await;
        let next = connection.call("read", json!({}));
        let request = peer.recv_json().await;
        peer.reply(&request["id"], json!(1)).await;
        assert_eq!(next.await.expect("reply"), json!(1));
    }

    #[tokio::test]
    async fn test_call_with_timeout_uses_its_own_id() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let _peer = gateway.accept().await;

        let _earlier = connection.call("read", json!({}));
        let err = connection
            .call_with_timeout("write", json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RequestTimeout { request_id, .. } if request_id == RequestId::new(2)
        ));
        assert_eq!(connection.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_hook_runs_when_reply_is_dropped() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let (seen_tx, seen_rx) = oneshot::channel();
        let reply = connection.call_with_hook(
            "connect",
            json!({"peripheralId": "a"}),
            Box::new(move |result: Result<Value>| {
                let _ = seen_tx.send(result.as_ref().ok().cloned());
                result
            }),
        );
        drop(reply);

        let request = peer.recv_json().await;
        peer.reply(&request["id"], json!("linked")).await;

        let seen = timeout(STEP_TIMEOUT, seen_rx).await.expect("hook ran");
        assert_eq!(seen.expect("sender kept"), Some(json!("linked")));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_hook_output_reaches_caller() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;

        let reply = connection.call_with_hook(
            "read",
            json!({}),
            Box::new(|result: Result<Value>| result.map(|value| json!({"wrapped": value}))),
        );
        let request = peer.recv_json().await;
        peer.reply(&request["id"], json!(7)).await;

        assert_eq!(reply.await.expect("reply"), json!({"wrapped": 7}));
    }

    #[test]
    fn test_hook_runs_for_calls_failed_by_shutdown() {
        let connection = Connection::new(Connector::new("ws://127.0.0.1:9").expect("valid"));
        let failures = Arc::new(AtomicU64::new(0));

        let counted = Arc::clone(&failures);
        let _queued = connection.call_with_hook(
            "read",
            json!({}),
            Box::new(move |result: Result<Value>| {
                counted.fetch_add(u64::from(result.is_err()), Ordering::SeqCst);
                result
            }),
        );
        connection.shutdown();
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        // After close the hook runs before call_with_hook returns
        let counted = Arc::clone(&failures);
        let late = connection.call_with_hook(
            "read",
            json!({}),
            Box::new(move |result: Result<Value>| {
                counted.fetch_add(u64::from(result.is_err()), Ordering::SeqCst);
                result
            }),
        );
        assert_eq!(failures.load(Ordering::SeqCst), 2);
        let mut late = task::spawn(late);
        assert_ready_err!(late.poll());
    }

    #[tokio::test]
    async fn test_shutdown_closes_socket() {
        let gateway = FakeGateway::bind().await;
        let connection = connection_for(&gateway);
        connection.open().expect("open");
        let mut peer = gateway.accept().await;
        connection.wait_open().await.expect("open");

        let pending = connection.call("read", json!({}));
        peer.recv_json().await;
        connection.shutdown();

        assert!(matches!(pending.await, Err(Error::ConnectionClosed)));
        assert!(peer.try_recv_json(STEP_TIMEOUT).await.is_none());
        assert!(matches!(
            connection.wait_open().await,
            Err(Error::ConnectionClosed)
        ));
    }
}
