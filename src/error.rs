use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::protocol::Action;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not connected: call connect() first")]
    NotConnected,

    #[error("No endpoint configured")]
    MissingEndpoint,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("Connection failed after {attempts} attempts: {source}")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Failed to send {action} request: {source}")]
    Send {
        action: Action,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Failed to receive {action} reply: {source}")]
    Receive {
        action: Action,
        #[source]
        source: tungstenite::Error,
    },

    #[error("Connection closed by peer while waiting for {action} reply")]
    ConnectionClosed { action: Action },

    /// A late reply would be mistaken for the answer to the next request, so a
    /// timeout on `register`/`update` also closes the connection; call
    /// `reconnect()` before the next request. A timed out `wait_for_data`
    /// leaves the connection open.
    #[error("Timed out after {timeout:?} waiting for {action} reply")]
    Timeout { action: Action, timeout: Duration },

    #[error("Failed to encode request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to close connection: {0}")]
    Close(#[source] tungstenite::Error),
}

/// Connect failures worth another attempt: the server answered the handshake
/// with a non-101 status, or the peer reset the socket mid-handshake.
pub fn is_retryable(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Http(_) => true,
        tungstenite::Error::Io(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
        _ => false,
    }
}

/// Errors raised because the socket is already shutting down. `close()` treats these as success.
pub(crate) fn is_close_race(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(tungstenite::error::ProtocolError::SendAfterClosing)
    )
}
