// Dispatch transport
//
// JSON envelopes carried in WebSocket text frames. Each connection gets
// its own task and is served in order: one request frame in, at most one
// reply frame out.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::TaskDispatcher;
use super::envelope::{Envelope, Reply};
use crate::config::constants::MAX_FRAME_LENGTH;

/// Frame limits shared by both ends of the dispatch channel
pub(crate) fn frame_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_LENGTH);
    config.max_frame_size = Some(MAX_FRAME_LENGTH);
    config
}

pub struct DispatchServer {
    listener: TcpListener,
    dispatcher: TaskDispatcher,
    cancel: CancellationToken,
}

impl DispatchServer {
    pub async fn bind(addr: &str, dispatcher: TaskDispatcher) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind dispatch listener to {}", addr))?;
        Ok(Self {
            listener,
            dispatcher,
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get dispatch listener address")
    }

    /// Token that stops the accept loop and every open connection
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept connections until cancelled
    pub async fn serve(self) -> Result<()> {
        let local = self.local_addr()?;
        info!(addr = %local, "Dispatch server listening");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted dispatch connection");
                        let dispatcher = self.dispatcher.clone();
                        let cancel = self.cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, dispatcher, cancel).await {
                                warn!(peer = %peer, error = %e, "Dispatch connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept dispatch connection"),
                },
            }
        }

        info!(addr = %local, "Dispatch server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: TaskDispatcher,
    cancel: CancellationToken,
) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }
    let mut ws = accept_async_with_config(stream, Some(frame_config()))
        .await
        .context("WebSocket handshake failed")?;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = ws.next() => next,
        };
        let text = match next {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    send(&mut ws, &Reply::error("Binary frame is not UTF-8 JSON")).await?;
                    continue;
                }
            },
            // ping/pong are answered by the protocol layer
            Some(Ok(_)) => continue,
            Some(Err(WsError::Capacity(e))) => {
                debug!(peer = %peer, error = %e, "Oversized dispatch frame");
                let _ = send(&mut ws, &Reply::error("Message too large")).await;
                break;
            }
            Some(Err(WsError::ConnectionClosed)) => break,
            Some(Err(e)) => {
                return Err(e).context("Dispatch connection read failed");
            }
        };

        if text.trim().is_empty() {
            continue;
        }

        let reply = match Envelope::parse(&text) {
            Ok(envelope) => dispatcher.handle(envelope).await,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Malformed request frame");
                Some(Reply::error(e))
            }
        };

        if let Some(reply) = reply {
            send(&mut ws, &reply).await?;
        }
    }

    let _ = ws.close(None).await;
    debug!(peer = %peer, "Dispatch connection closed");
    Ok(())
}

async fn send(ws: &mut WebSocketStream<TcpStream>, reply: &Reply) -> Result<()> {
    let text = serde_json::to_string(reply).context("Failed to serialize reply")?;
    ws.send(Message::Text(text))
        .await
        .context("Failed to write dispatch reply")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::CapabilityTable;
    use crate::service::{ServiceDescriptor, SharedDescriptor};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn start() -> (SocketAddr, CancellationToken) {
        let descriptor =
            SharedDescriptor::new(ServiceDescriptor::new("Svc", "1.0.0", "127.0.0.1:0", vec![]));
        let dispatcher = TaskDispatcher::new(descriptor, CapabilityTable::new());
        let server = DispatchServer::bind("127.0.0.1:0", dispatcher).await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = server.cancel_token();
        tokio::spawn(server.serve());
        (addr, cancel)
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures::Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for reply")
                .unwrap()
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_one_reply_per_answered_frame_in_order() {
        let (addr, cancel) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        // garbage, an unanswered type, then a status query
        ws.send(Message::Text("not json".to_string())).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"CancelTask","payload":{}}"#.to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            r#"{"type":"GetStatus","payload":{"taskId":"t-9"}}"#.to_string(),
        ))
        .await
        .unwrap();

        let first = next_json(&mut ws).await;
        assert_eq!(first["type"], "Error");

        let second = next_json(&mut ws).await;
        assert_eq!(second["type"], "Status");
        assert_eq!(second["taskId"], "t-9");
        assert_eq!(second["taskStatus"], "Unknown");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_binary_frame_with_json_is_answered() {
        let (addr, cancel) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(Message::Binary(
            br#"{"type":"GetResult","payload":{"taskId":"t-1"}}"#.to_vec(),
        ))
        .await
        .unwrap();
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "TaskResult");
        assert_eq!(reply["error"], "Result not ready");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancel_closes_open_connections() {
        let (addr, cancel) = start().await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap();
        assert!(matches!(next, None | Some(Err(_)) | Some(Ok(Message::Close(_)))));
    }
}
