// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Clearing-Node RPC Transport
//!
//! Maintains exactly one duplex WebSocket connection to the clearing node.
//! Responsibilities:
//!
//! - request/response correlation over strictly monotonic ids
//! - an ordered offline queue flushed after (re)connection
//! - automatic reconnection with exponential backoff and a hard budget
//! - notification dispatch and the server-pushed asset catalogue cache
//!
//! The transport is single-reader, multi-writer: one task owns the socket's
//! read half, and every write goes through a mutex over the write half.
//! Re-authentication is delegated to an opaque [`ConnectHook`] that runs
//! after the socket opens and before the offline queue is flushed.

pub mod envelope;
pub mod notify;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::WalletError;
use crate::models::Asset;

pub use envelope::{RequestFrame, ResponseFrame, RpcErrorBody, RpcRequest};
pub use notify::{
    AppSessionUpdateNotice, BalanceUpdateNotice, ChannelUpdateNotice, Notification,
    NotificationKind, NotificationRegistry, TransferNotice,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Transport configuration. Field defaults match the clearing node's
/// recommended client settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub request_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 5,
            initial_reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(30_000),
            request_timeout: Duration::from_millis(30_000),
        }
    }
}

/// Connection machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: the reconnection budget is spent.
    Failed,
}

/// Signs the canonical encoding of an outgoing `req` array.
///
/// The session-auth module is the production implementation; the transport
/// itself never holds key material.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, payload: &[u8]) -> Result<String, WalletError>;
}

/// Runs after the socket opens and before the offline queue is flushed.
///
/// An error closes the connection with a non-clean code so the normal
/// reconnection path applies.
#[async_trait]
pub trait ConnectHook: Send + Sync {
    async fn on_connect(&self, transport: &ClearingTransport) -> Result<(), WalletError>;
}

struct TransportInner {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    next_id: AtomicU64,
    pending: StdMutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, WalletError>>>>,
    queue: StdMutex<VecDeque<String>>,
    writer: Mutex<Option<WsSink>>,
    registry: NotificationRegistry,
    assets: RwLock<Arc<Vec<Asset>>>,
    on_connect: StdMutex<Option<Arc<dyn ConnectHook>>>,
    shutdown: CancellationToken,
    driver_running: StdMutex<bool>,
}

/// Handle to the clearing-node connection. Cheap to clone; all clones share
/// one connection, id counter, queue, and pending map.
#[derive(Clone)]
pub struct ClearingTransport {
    inner: Arc<TransportInner>,
}

impl ClearingTransport {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(TransportInner {
                config,
                state,
                next_id: AtomicU64::new(1),
                pending: StdMutex::new(HashMap::new()),
                queue: StdMutex::new(VecDeque::new()),
                writer: Mutex::new(None),
                registry: NotificationRegistry::new(),
                assets: RwLock::new(Arc::new(Vec::new())),
                on_connect: StdMutex::new(None),
                shutdown: CancellationToken::new(),
                driver_running: StdMutex::new(false),
            }),
        }
    }

    /// Install the hook that runs between socket open and queue flush.
    /// Must be set before [`connect`](Self::connect).
    pub fn set_on_connect(&self, hook: Arc<dyn ConnectHook>) {
        if let Ok(mut slot) = self.inner.on_connect.lock() {
            *slot = Some(hook);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the server-pushed asset catalogue.
    pub fn assets(&self) -> Arc<Vec<Asset>> {
        self.inner
            .assets
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Look an asset up by symbol (case-insensitive), optionally narrowed to
    /// a chain id.
    pub fn find_asset(&self, symbol: &str, chain_id: Option<u64>) -> Option<Asset> {
        let needle = symbol.to_lowercase();
        self.assets()
            .iter()
            .find(|asset| {
                asset.symbol.to_lowercase() == needle
                    && chain_id.map(|id| asset.chain_id == id).unwrap_or(true)
            })
            .cloned()
    }

    /// Subscribe to a notification kind. See [`NotificationRegistry`].
    pub fn subscribe(&self, kind: NotificationKind) -> tokio::sync::mpsc::Receiver<Notification> {
        self.inner.registry.subscribe(kind)
    }

    /// Start the connection driver. A second call while the driver is live
    /// (connecting, connected, or backing off) is a no-op.
    pub fn connect(&self) {
        {
            let mut running = match self.inner.driver_running.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if *running {
                return;
            }
            *running = true;
        }
        let transport = self.clone();
        tokio::spawn(async move {
            transport.run().await;
            if let Ok(mut running) = transport.inner.driver_running.lock() {
                *running = false;
            }
        });
    }

    /// Wait until the transport reaches `CONNECTED`, or fail when it gives up
    /// first.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), WalletError> {
        let mut changes = self.state_changes();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                match *changes.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Failed => {
                        return Err(WalletError::unavailable(
                            "connection failed before becoming ready",
                        ))
                    }
                    _ => {}
                }
                if changes.changed().await.is_err() {
                    return Err(WalletError::internal("transport driver dropped"));
                }
            }
        })
        .await;
        match waited {
            Ok(result) => result,
            Err(_) => Err(WalletError::timeout("transport did not connect in time")),
        }
    }

    /// Close the connection cleanly (code 1000) and stop reconnecting.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        let mut writer = self.inner.writer.lock().await;
        if let Some(sink) = writer.as_mut() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        *writer = None;
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }

    /// Send a request and await its correlated response.
    ///
    /// Assigns the next id, registers a resolver, and either writes the frame
    /// immediately or queues it while offline. The caller never sees the id.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        signer: Option<&dyn RequestSigner>,
    ) -> Result<serde_json::Value, WalletError> {
        if self.state() == ConnectionState::Failed {
            return Err(WalletError::unavailable(
                "not connected: reconnection budget exhausted",
            ));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params, now_ms());
        let sig = match signer {
            Some(signer) => vec![signer.sign(request.canonical()?.as_bytes())?],
            None => Vec::new(),
        };
        let text = request.into_frame(sig).encode()?;

        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.insert(id, tx);
        }

        if let Err(err) = self.write_or_enqueue(text).await {
            self.remove_pending(id);
            return Err(err);
        }

        match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WalletError::unavailable("connection lost")),
            Err(_) => {
                self.remove_pending(id);
                Err(WalletError::timeout(format!(
                    "{method} did not complete within {:?}",
                    self.inner.config.request_timeout
                )))
            }
        }
    }

    fn remove_pending(&self, id: u64) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.remove(&id);
        }
    }

    /// Write a frame if the socket is open, otherwise append it to the
    /// offline queue. Write errors on an open socket propagate.
    async fn write_or_enqueue(&self, text: String) -> Result<(), WalletError> {
        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            Some(sink) if self.state() == ConnectionState::Connected => sink
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| WalletError::unavailable(format!("socket write failed: {e}"))),
            _ => {
                drop(writer);
                if let Ok(mut queue) = self.inner.queue.lock() {
                    queue.push_back(text);
                }
                Ok(())
            }
        }
    }

    /// Connection driver: connect, run the hook, flush the queue, read until
    /// the socket drops, then back off and retry within the budget.
    async fn run(&self) {
        let inner = &self.inner;
        let mut attempt: u32 = 0;
        loop {
            if inner.shutdown.is_cancelled() {
                return;
            }
            inner.state.send_replace(ConnectionState::Connecting);

            match connect_async(&inner.config.url).await {
                Ok((socket, _)) => {
                    attempt = 0;
                    let (sink, stream) = socket.split();
                    *inner.writer.lock().await = Some(sink);
                    inner.state.send_replace(ConnectionState::Connected);
                    tracing::info!(url = %inner.config.url, "clearing node connected");

                    let hook = inner
                        .on_connect
                        .lock()
                        .ok()
                        .and_then(|slot| slot.clone());
                    let hook_ok = match hook {
                        Some(hook) => match hook.on_connect(self).await {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::warn!(error = %e, "on-connect hook failed, recycling connection");
                                self.abort_socket(CloseCode::Policy).await;
                                false
                            }
                        },
                        None => true,
                    };

                    if hook_ok {
                        self.flush_queue().await;
                        let clean = self.read_loop(stream).await;
                        *inner.writer.lock().await = None;
                        inner.state.send_replace(ConnectionState::Disconnected);
                        if clean || inner.shutdown.is_cancelled() {
                            return;
                        }
                    } else {
                        *inner.writer.lock().await = None;
                        inner.state.send_replace(ConnectionState::Disconnected);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "clearing node connection attempt failed");
                    inner.state.send_replace(ConnectionState::Disconnected);
                }
            }

            attempt += 1;
            if attempt > inner.config.max_reconnect_attempts {
                tracing::error!(
                    attempts = attempt - 1,
                    "reconnection budget exhausted, giving up"
                );
                inner.state.send_replace(ConnectionState::Failed);
                self.fail_all_pending();
                return;
            }

            inner.state.send_replace(ConnectionState::Reconnecting);
            let delay = reconnect_delay(&inner.config, attempt);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = inner.shutdown.cancelled() => return,
            }
        }
    }

    /// Close the write half with an explicit non-clean code.
    async fn abort_socket(&self, code: CloseCode) {
        let mut writer = self.inner.writer.lock().await;
        if let Some(sink) = writer.as_mut() {
            let _ = sink
                .send(Message::Close(Some(
                    tokio_tungstenite::tungstenite::protocol::CloseFrame {
                        code,
                        reason: "".into(),
                    },
                )))
                .await;
            let _ = sink.close().await;
        }
        *writer = None;
    }

    /// Flush the offline queue in FIFO order. A failed write re-prepends the
    /// frame and stops; it will be retried after the next reconnect.
    async fn flush_queue(&self) {
        loop {
            let next = match self.inner.queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => return,
            };
            let Some(text) = next else { return };

            let mut writer = self.inner.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                if let Ok(mut queue) = self.inner.queue.lock() {
                    queue.push_front(text);
                }
                return;
            };
            if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
                tracing::warn!(error = %e, "queue flush write failed");
                if let Ok(mut queue) = self.inner.queue.lock() {
                    queue.push_front(text);
                }
                return;
            }
        }
    }

    /// Read until the connection ends. Returns `true` for a clean close
    /// (code 1000), `false` otherwise.
    async fn read_loop(&self, mut stream: WsStream) -> bool {
        loop {
            let message = tokio::select! {
                message = stream.next() => message,
                _ = self.inner.shutdown.cancelled() => return true,
            };
            match message {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame
                        .as_ref()
                        .map(|f| f.code == CloseCode::Normal)
                        .unwrap_or(false);
                    tracing::info!(clean, "clearing node closed the connection");
                    return clean;
                }
                Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "socket read failed");
                    return false;
                }
                None => return false,
            }
        }
    }

    /// Correlate one inbound frame: resolve a pending request, or dispatch a
    /// notification. Parse errors are logged and skipped.
    fn handle_frame(&self, text: &str) {
        let frame = match ResponseFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable frame");
                return;
            }
        };

        let resolver = self
            .inner
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&frame.id()));
        if let Some(resolver) = resolver {
            let _ = resolver.send(frame.into_result());
            return;
        }

        let method = frame.method().to_string();
        match NotificationKind::from_method(&method) {
            Some(NotificationKind::Assets) => {
                self.replace_assets_from(frame.payload());
                self.inner.registry.dispatch(Notification {
                    kind: NotificationKind::Assets,
                    params: frame.res.2,
                });
            }
            Some(kind) => self.inner.registry.dispatch(Notification {
                kind,
                params: frame.res.2,
            }),
            None => {
                tracing::debug!(method = %method, "discarding unknown notification");
            }
        }
    }

    fn replace_assets_from(&self, payload: &serde_json::Value) {
        // The catalogue arrives either as a bare array or as {"assets": [...]}.
        let parsed: Result<Vec<Asset>, _> = match payload.get("assets") {
            Some(list) => serde_json::from_value(list.clone()),
            None => serde_json::from_value(payload.clone()),
        };
        match parsed {
            Ok(catalogue) => self.replace_assets(catalogue),
            Err(e) => tracing::warn!(error = %e, "ignoring malformed asset catalogue"),
        }
    }

    /// Replace the asset catalogue wholesale. The catalogue persists across
    /// reconnects until the next `assets` notification.
    pub(crate) fn replace_assets(&self, catalogue: Vec<Asset>) {
        if let Ok(mut guard) = self.inner.assets.write() {
            *guard = Arc::new(catalogue);
        }
    }

    /// Fail every pending request; used when the transport gives up.
    fn fail_all_pending(&self) {
        let resolvers: Vec<_> = match self.inner.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => return,
        };
        for (_, resolver) in resolvers {
            let _ = resolver.send(Err(WalletError::unavailable(
                "not connected: reconnection budget exhausted",
            )));
        }
    }
}

/// Backoff for the given attempt (1-based): `initial * 2^(attempt-1)`,
/// capped at the configured maximum.
fn reconnect_delay(config: &TransportConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let delay = config
        .initial_reconnect_delay
        .saturating_mul(1u32 << exp);
    delay.min(config.max_reconnect_delay)
}

pub(crate) fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Minimal clearing-node stand-in: accepts connections and hands each
    /// socket to the given handler.
    async fn spawn_server<F>(handler: F) -> String
    where
        F: Fn(WebSocketStream<TcpStream>) -> futures_util::future::BoxFuture<'static, ()>
            + Send
            + Sync
            + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let socket = tokio_tungstenite::accept_async(stream)
                    .await
                    .expect("ws accept");
                handler(socket).await;
            }
        });
        format!("ws://{addr}")
    }

    fn echo_pong(socket: WebSocketStream<TcpStream>) -> futures_util::future::BoxFuture<'static, ()> {
        Box::pin(async move {
            let (mut sink, mut stream) = socket.split();
            while let Some(Ok(Message::Text(text))) = stream.next().await {
                let frame = RequestFrame::decode(&text).expect("request frame");
                let request = frame.request();
                let reply = serde_json::to_string(&ResponseFrame {
                    res: (
                        request.id,
                        request.method.clone(),
                        json!({"pong": "pong"}),
                        now_ms(),
                    ),
                    sig: vec![],
                    error: None,
                })
                .unwrap();
                if sink.send(Message::Text(reply.into())).await.is_err() {
                    return;
                }
            }
        })
    }

    fn test_config(url: String) -> TransportConfig {
        let mut config = TransportConfig::new(url);
        config.initial_reconnect_delay = Duration::from_millis(20);
        config.max_reconnect_delay = Duration::from_millis(100);
        config.request_timeout = Duration::from_millis(2_000);
        config
    }

    #[tokio::test]
    async fn request_resolves_with_payload() {
        let url = spawn_server(echo_pong).await;
        let transport = ClearingTransport::new(test_config(url));
        transport.connect();
        transport
            .wait_connected(Duration::from_secs(2))
            .await
            .unwrap();

        let payload = transport.request("ping", json!({}), None).await.unwrap();
        assert_eq!(payload["pong"], "pong");

        transport.close().await;
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let url = spawn_server(|socket| {
            Box::pin(async move {
                let (mut sink, mut stream) = socket.split();
                let mut last_id = 0u64;
                while let Some(Ok(Message::Text(text))) = stream.next().await {
                    let frame = RequestFrame::decode(&text).unwrap();
                    assert!(frame.req.0 > last_id, "ids must strictly increase");
                    last_id = frame.req.0;
                    let reply = serde_json::to_string(&ResponseFrame {
                        res: (frame.req.0, frame.req.1.clone(), json!({}), now_ms()),
                        sig: vec![],
                        error: None,
                    })
                    .unwrap();
                    let _ = sink.send(Message::Text(reply.into())).await;
                }
            })
        })
        .await;

        let transport = ClearingTransport::new(test_config(url));
        transport.connect();
        transport
            .wait_connected(Duration::from_secs(2))
            .await
            .unwrap();

        for _ in 0..5 {
            transport.request("ping", json!({}), None).await.unwrap();
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn error_payload_becomes_clearing_node_error() {
        let url = spawn_server(|socket| {
            Box::pin(async move {
                let (mut sink, mut stream) = socket.split();
                while let Some(Ok(Message::Text(text))) = stream.next().await {
                    let frame = RequestFrame::decode(&text).unwrap();
                    let reply = serde_json::to_string(&ResponseFrame {
                        res: (frame.req.0, frame.req.1.clone(), json!({}), now_ms()),
                        sig: vec![],
                        error: Some(RpcErrorBody {
                            code: -32011,
                            message: "unknown channel".to_string(),
                        }),
                    })
                    .unwrap();
                    let _ = sink.send(Message::Text(reply.into())).await;
                }
            })
        })
        .await;

        let transport = ClearingTransport::new(test_config(url));
        transport.connect();
        transport
            .wait_connected(Duration::from_secs(2))
            .await
            .unwrap();

        let err = transport
            .request("close_channel", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::ClearingNode { code: -32011, .. }));
        transport.close().await;
    }

    #[tokio::test]
    async fn request_times_out_and_clears_pending() {
        let url = spawn_server(|socket| {
            Box::pin(async move {
                // Swallow requests without answering.
                let (_sink, mut stream) = socket.split();
                while stream.next().await.is_some() {}
            })
        })
        .await;

        let mut config = test_config(url);
        config.request_timeout = Duration::from_millis(100);
        let transport = ClearingTransport::new(config);
        transport.connect();
        transport
            .wait_connected(Duration::from_secs(2))
            .await
            .unwrap();

        let err = transport.request("ping", json!({}), None).await.unwrap_err();
        assert!(matches!(err, WalletError::Timeout(_)));
        assert!(transport.inner.pending.lock().unwrap().is_empty());
        transport.close().await;
    }

    #[tokio::test]
    async fn offline_request_is_queued_then_flushed_on_connect() {
        let url = spawn_server(echo_pong).await;
        let transport = ClearingTransport::new(test_config(url));

        // Not connected yet: the request parks in the offline queue.
        let parked = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("ping", json!({}), None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.inner.queue.lock().unwrap().len(), 1);

        transport.connect();
        let payload = parked.await.unwrap().unwrap();
        assert_eq!(payload["pong"], "pong");
        assert!(transport.inner.queue.lock().unwrap().is_empty());
        transport.close().await;
    }

    #[tokio::test]
    async fn unknown_ids_dispatch_as_notifications() {
        let url = spawn_server(|socket| {
            Box::pin(async move {
                let (mut sink, _stream) = socket.split();
                let notice = serde_json::to_string(&ResponseFrame {
                    res: (
                        999_999,
                        "bu".to_string(),
                        json!({"balance_updates": [{"asset": "usdc", "amount": "42"}]}),
                        now_ms(),
                    ),
                    sig: vec![],
                    error: None,
                })
                .unwrap();
                let _ = sink.send(Message::Text(notice.into())).await;
                // Hold the socket open so the client does not reconnect.
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
        })
        .await;

        let transport = ClearingTransport::new(test_config(url));
        let mut updates = transport.subscribe(NotificationKind::BalanceUpdate);
        transport.connect();

        let notification = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .unwrap()
            .unwrap();
        let payload: BalanceUpdateNotice = notification.decode().unwrap();
        assert_eq!(payload.balance_updates[0].amount, "42");
        transport.close().await;
    }

    #[tokio::test]
    async fn assets_notification_replaces_catalogue() {
        let url = spawn_server(|socket| {
            Box::pin(async move {
                let (mut sink, _stream) = socket.split();
                let notice = serde_json::to_string(&ResponseFrame {
                    res: (
                        999_999,
                        "assets".to_string(),
                        json!({"assets": [
                            {"symbol": "usdc", "chain_id": 8453, "token_address": "0x8335", "decimals": 6},
                            {"symbol": "eth", "chain_id": 1, "decimals": 18}
                        ]}),
                        now_ms(),
                    ),
                    sig: vec![],
                    error: None,
                })
                .unwrap();
                let _ = sink.send(Message::Text(notice.into())).await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
        })
        .await;

        let transport = ClearingTransport::new(test_config(url));
        let mut assets_events = transport.subscribe(NotificationKind::Assets);
        transport.connect();

        tokio::time::timeout(Duration::from_secs(2), assets_events.recv())
            .await
            .unwrap()
            .unwrap();

        let catalogue = transport.assets();
        assert_eq!(catalogue.len(), 2);
        let usdc = transport.find_asset("USDC", Some(8453)).unwrap();
        assert_eq!(usdc.decimals, 6);
        assert!(transport.find_asset("usdc", Some(1)).is_none());
        transport.close().await;
    }

    #[tokio::test]
    async fn non_clean_close_triggers_reconnect_and_flush() {
        // First connection: drop immediately without a close handshake.
        // Later connections: behave like a normal node.
        let dropped_once = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&dropped_once);
        let url = spawn_server(move |socket| {
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                if !flag.swap(true, Ordering::SeqCst) {
                    drop(socket);
                    return;
                }
                echo_pong(socket).await;
            })
        })
        .await;

        let transport = ClearingTransport::new(test_config(url));
        transport.connect();
        transport
            .wait_connected(Duration::from_secs(2))
            .await
            .unwrap();

        // Give the drop a moment to land, then issue a request. It either
        // queues (socket already gone) or fails over transparently after the
        // reconnect flushes the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let payload = transport.request("ping", json!({}), None).await.unwrap();
        assert_eq!(payload["pong"], "pong");
        transport.close().await;
    }

    #[tokio::test]
    async fn exhausted_budget_fails_fast() {
        // Bind-then-drop a listener to get an address nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = test_config(format!("ws://{addr}"));
        config.max_reconnect_attempts = 1;
        let transport = ClearingTransport::new(config);
        transport.connect();

        let mut changes = transport.state_changes();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *changes.borrow_and_update() == ConnectionState::Failed {
                    return;
                }
                changes.changed().await.unwrap();
            }
        })
        .await
        .expect("must reach FAILED");

        let err = transport.request("ping", json!({}), None).await.unwrap_err();
        assert!(matches!(err, WalletError::Unavailable(_)));
    }

    #[tokio::test]
    async fn connect_while_connected_is_a_no_op() {
        let url = spawn_server(echo_pong).await;
        let transport = ClearingTransport::new(test_config(url));
        transport.connect();
        transport
            .wait_connected(Duration::from_secs(2))
            .await
            .unwrap();

        transport.connect();
        transport.connect();
        assert_eq!(transport.state(), ConnectionState::Connected);

        let payload = transport.request("ping", json!({}), None).await.unwrap();
        assert_eq!(payload["pong"], "pong");
        transport.close().await;
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let config = TransportConfig::new("ws://node");
        assert_eq!(reconnect_delay(&config, 1), Duration::from_millis(1000));
        assert_eq!(reconnect_delay(&config, 2), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(&config, 3), Duration::from_millis(4000));
        assert_eq!(reconnect_delay(&config, 5), Duration::from_millis(16_000));
        assert_eq!(reconnect_delay(&config, 7), Duration::from_millis(30_000));
    }
}
