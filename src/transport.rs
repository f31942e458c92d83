//! WebSocket transport: handshake, the connect seam, and the owned socket.
//!
//! A [`Connection`] splits the socket on creation. The write half stays with
//! the owner; the read half is drained by a background task into an unbounded
//! channel, which doubles as the inbound buffer reported by
//! [`Connection::buffered`]. Only text frames go through that channel; a read
//! error that ends the stream travels on a separate oneshot and surfaces after
//! the buffered frames are consumed.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{generate_key, Request};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{ClientError, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Inbound = std::result::Result<String, tungstenite::Error>;

const KEY_HEADER: &str = "Sec-WebSocket-Key";

/// Performs the transport-level connect for one attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: Request) -> std::result::Result<WsStream, tungstenite::Error>;
}

/// Plain `tokio-tungstenite` connector (TLS through native-tls for `wss://`).
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: Request) -> std::result::Result<WsStream, tungstenite::Error> {
        let (stream, response) = tokio_tungstenite::connect_async(request).await?;
        log::debug!("Handshake complete, status: {}", response.status());
        Ok(stream)
    }
}

/// Build the handshake request for `endpoint` and return it with its
/// `Sec-WebSocket-Key`, which identifies the resulting connection.
pub fn handshake_request(endpoint: &str) -> Result<(Request, String)> {
    let url = Url::parse(endpoint)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(ClientError::Connect)?;

    let key = match request
        .headers()
        .get(KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(key) => key.to_string(),
        None => {
            let key = generate_key();
            let value = HeaderValue::from_str(&key)
                .map_err(|e| ClientError::Connect(tungstenite::Error::HttpFormat(e.into())))?;
            request.headers_mut().insert(KEY_HEADER, value);
            key
        }
    };

    Ok((request, key))
}

/// An open WebSocket owned by exactly one client.
pub struct Connection {
    endpoint: String,
    id: String,
    sink: SplitSink<WsStream, Message>,
    inbound: mpsc::UnboundedReceiver<String>,
    failure: Option<oneshot::Receiver<tungstenite::Error>>,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn new(endpoint: impl Into<String>, id: impl Into<String>, stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let (failed_tx, failure) = oneshot::channel();
        let reader = tokio::spawn(pump_inbound(stream, tx, failed_tx));

        Self {
            endpoint: endpoint.into(),
            id: id.into(),
            sink,
            inbound,
            failure: Some(failure),
            reader,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True until the peer closes the stream or the read side fails.
    pub fn is_open(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Text frames received but not yet consumed. A terminal read error is not counted.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    pub async fn send_text(&mut self, text: String) -> std::result::Result<(), tungstenite::Error> {
        self.sink.send(Message::Text(text.into())).await
    }

    /// Next inbound text frame. Once the buffer is drained, yields the read
    /// error that ended the stream (at most once), then `None`.
    pub async fn recv_text(&mut self) -> Option<Inbound> {
        match self.inbound.recv().await {
            Some(text) => Some(Ok(text)),
            None => self
                .failure
                .take()
                .and_then(|mut rx| rx.try_recv().ok())
                .map(Err),
        }
    }

    /// Send a close frame and give the peer up to `timeout` to finish the closing handshake.
    pub async fn close(mut self, timeout: Duration) -> std::result::Result<(), tungstenite::Error> {
        let result = self.sink.close().await;
        if tokio::time::timeout(timeout, &mut self.reader).await.is_err() {
            log::debug!("Peer did not complete close handshake within {:?}", timeout);
        }
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("buffered", &self.buffered())
            .finish()
    }
}

async fn pump_inbound(
    mut stream: SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<String>,
    failed: oneshot::Sender<tungstenite::Error>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let text = text.to_string();
                log::trace!("Buffered inbound frame: {}", text);
                if tx.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                log::warn!("Ignoring {} byte binary frame", data.len());
            }
            Ok(Message::Close(frame)) => {
                // Keep polling so the close reply gets flushed; the stream ends on the next read.
                log::info!("Server closed connection: {:?}", frame);
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("WebSocket read error: {}", e);
                let _ = failed.send(e);
                break;
            }
        }
    }
    log::debug!("Inbound stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_carries_key() {
        let (request, key) = handshake_request("ws://127.0.0.1:9000/stream").unwrap();
        assert!(!key.is_empty());
        assert_eq!(
            request.headers().get(KEY_HEADER).unwrap().to_str().unwrap(),
            key
        );
        assert_eq!(request.uri().path(), "/stream");
    }

    #[test]
    fn test_fresh_key_per_request() {
        let (_, first) = handshake_request("ws://127.0.0.1:9000").unwrap();
        let (_, second) = handshake_request("ws://127.0.0.1:9000").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_endpoint_rejected() {
        let err = handshake_request("not a url").unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint(_)));
    }
}
