// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test-only helpers: a scripted clearing-node stand-in.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use crate::auth::{IdentityClaims, SessionAuth};
use crate::rpc::{
    now_ms, ClearingTransport, RequestFrame, ResponseFrame, RpcErrorBody, TransportConfig,
};

/// Spawn a WebSocket server that answers every request through `handler`.
/// Returns the `ws://` URL.
pub async fn spawn_rpc_server<H>(handler: H) -> String
where
    H: Fn(&str, &Value) -> Result<Value, RpcErrorBody> + Send + Sync + 'static,
{
    spawn_frame_server(move |frame| handler(&frame.req.1, &frame.req.2)).await
}

/// Like [`spawn_rpc_server`], but hands the handler the whole request frame
/// so tests can assert on signatures.
pub async fn spawn_frame_server<H>(handler: H) -> String
where
    H: Fn(&RequestFrame) -> Result<Value, RpcErrorBody> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let socket = match tokio_tungstenite::accept_async(stream).await {
                    Ok(socket) => socket,
                    Err(_) => return,
                };
                let (mut sink, mut stream) = socket.split();
                while let Some(Ok(Message::Text(text))) = stream.next().await {
                    let Ok(frame) = RequestFrame::decode(&text) else {
                        continue;
                    };
                    let result = handler(&frame);
                    let (id, method) = (frame.req.0, frame.req.1);
                    let reply = match result {
                        Ok(payload) => ResponseFrame {
                            res: (id, method, payload, now_ms()),
                            sig: vec![],
                            error: None,
                        },
                        Err(body) => ResponseFrame {
                            res: (id, method, Value::Null, now_ms()),
                            sig: vec![],
                            error: Some(body),
                        },
                    };
                    let encoded = serde_json::to_string(&reply).expect("encode reply");
                    if sink.send(Message::Text(encoded.into())).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    format!("ws://{addr}")
}

/// Connect a transport to the given URL and wait until it is ready.
pub async fn connected_transport(url: String) -> ClearingTransport {
    let transport = ClearingTransport::new(TransportConfig::new(url));
    transport.connect();
    transport
        .wait_connected(Duration::from_secs(2))
        .await
        .expect("transport must connect");
    transport
}

/// A session-auth instance with throwaway identity claims.
pub fn test_auth() -> Arc<SessionAuth> {
    Arc::new(SessionAuth::new(IdentityClaims::new(
        "0x1111111111111111111111111111111111111111",
        "clearbridge-tests",
    )))
}

/// Minimal HTTP/1.1 stand-in for the indexer: answers every request from a
/// script of `(status, body)` pairs, repeating the last entry, and counts
/// hits. Asserts basic auth is present on every request.
pub async fn spawn_http_server(
    script: Vec<(u16, String)>,
    hits: Arc<std::sync::atomic::AtomicUsize>,
) -> String {
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buffer = vec![0u8; 8192];
            let Ok(read) = stream.read(&mut buffer).await else {
                continue;
            };
            let request = String::from_utf8_lossy(&buffer[..read]).to_string();
            assert!(
                request.contains("authorization: Basic ") || request.contains("Authorization: Basic "),
                "missing basic auth header in: {request}"
            );

            let hit = hits.fetch_add(1, Ordering::SeqCst);
            let (status, body) = script
                .get(hit)
                .or_else(|| script.last())
                .cloned()
                .unwrap_or((500, String::new()));
            let reason = if status == 200 { "OK" } else { "NOPE" };
            let reply = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });
    format!("http://{addr}")
}
