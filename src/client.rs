//! # Heartbridge client
//!
//! Owns a single WebSocket connection to the streaming service and speaks its
//! action-based JSON protocol.
//!
//! The protocol has no request ids: a reply is matched to its request purely
//! by stream order. Every operation takes `&mut self`, so a client can only
//! ever have one request waiting for a reply.

use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::{is_close_race, is_retryable, ClientError, Result};
use crate::protocol::{Action, Command};
use crate::transport::{handshake_request, Connection, Connector, WebSocketConnector};

/// Observable lifecycle of the client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NoConnection,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
enum State {
    NoConnection,
    Connecting,
    Open(Connection),
    Closed,
}

/// Holds the state at `Connecting` for the duration of a connect call and
/// falls back to `NoConnection` unless the attempt ends in [`Self::open`].
struct ConnectingGuard<'a> {
    state: &'a mut State,
}

impl<'a> ConnectingGuard<'a> {
    fn enter(state: &'a mut State) -> Self {
        *state = State::Connecting;
        Self { state }
    }

    fn open(self, conn: Connection) {
        *self.state = State::Open(conn);
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if matches!(self.state, State::Connecting) {
            *self.state = State::NoConnection;
        }
    }
}

async fn connect_with_retry<C: Connector>(
    connector: &C,
    config: &ClientConfig,
    endpoint: &str,
    max_retries: u32,
) -> Result<Connection> {
    let mut retry_count: u32 = 0;

    loop {
        let (request, key) = handshake_request(endpoint)?;

        match connector.connect(request).await {
            Ok(stream) => {
                info!("Connected to {} (connection id {})", endpoint, key);
                return Ok(Connection::new(endpoint, key, stream));
            }
            Err(e) if is_retryable(&e) => {
                retry_count += 1;
                if retry_count > max_retries {
                    error!("Giving up on {} after {} attempts: {}", endpoint, retry_count, e);
                    return Err(ClientError::ConnectExhausted {
                        attempts: retry_count,
                        source: e,
                    });
                }
                let delay = config.backoff_unit * retry_count;
                warn!("Exception: {} -- Retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(ClientError::Connect(e)),
        }
    }
}

#[derive(Debug)]
pub struct HeartbridgeClient<C: Connector = WebSocketConnector> {
    config: ClientConfig,
    connector: C,
    state: State,
}

impl HeartbridgeClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(endpoint))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_connector(config, WebSocketConnector)
    }
}

impl<C: Connector> HeartbridgeClient<C> {
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            state: State::NoConnection,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.config.endpoint.as_deref()
    }

    pub fn status(&self) -> ConnectionState {
        match self.state {
            State::NoConnection => ConnectionState::NoConnection,
            State::Connecting => ConnectionState::Connecting,
            State::Open(_) => ConnectionState::Open,
            State::Closed => ConnectionState::Closed,
        }
    }

    /// True while a connection is held and its socket has not been closed by either side.
    pub fn is_connected(&self) -> bool {
        matches!(&self.state, State::Open(conn) if conn.is_open())
    }

    /// `Sec-WebSocket-Key` sent in the handshake of the active connection.
    pub fn connection_id(&self) -> Result<&str> {
        match &self.state {
            State::Open(conn) => Ok(conn.id()),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Connect, retrying handshake rejections and connection resets.
    ///
    /// `endpoint` replaces the remembered target when given. `max_retries`
    /// falls back to the configured ceiling. The wait before retry `n` is
    /// `n * backoff_unit`. Any live connection is closed and replaced.
    ///
    /// Dropping the returned future mid-attempt leaves the client in `NoConnection`.
    pub async fn connect(&mut self, endpoint: Option<&str>, max_retries: Option<u32>) -> Result<()> {
        if let Some(endpoint) = endpoint {
            self.config.endpoint = Some(endpoint.to_string());
        }
        let endpoint = self
            .config
            .endpoint
            .clone()
            .ok_or(ClientError::MissingEndpoint)?;
        let max_retries = max_retries.unwrap_or(self.config.max_retries);

        if matches!(self.state, State::Open(_)) {
            info!("Replacing existing connection");
            if let Err(e) = self.close().await {
                warn!("Failed to close previous connection: {}", e);
            }
        }

        let guard = ConnectingGuard::enter(&mut self.state);
        let conn = connect_with_retry(&self.connector, &self.config, &endpoint, max_retries).await?;
        guard.open(conn);
        Ok(())
    }

    /// Close the current connection and connect again to the remembered endpoint.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.connect(None, None).await
    }

    /// Close the connection if one is held. Closing twice is a no-op.
    ///
    /// Errors caused by the socket already shutting down are ignored.
    pub async fn close(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.state, State::Closed);
        if let State::Open(conn) = previous {
            match conn.close(self.config.close_timeout).await {
                Ok(()) => info!("Connection closed"),
                Err(e) if is_close_race(&e) => debug!("Connection already shutting down: {}", e),
                Err(e) => return Err(ClientError::Close(e)),
            }
        }
        Ok(())
    }

    /// Ask the server to push updates for a performance. Pushes arrive via [`Self::wait_for_data`].
    pub async fn subscribe(&mut self, performance_id: impl Into<String>) -> Result<()> {
        let performance_id = performance_id.into();
        info!("Subscribing to Performance ID: {}", performance_id);
        self.send(&Command::Subscribe { performance_id }).await
    }

    /// Register a performance and return the server's raw reply, which carries the session token.
    ///
    /// `performance_date` defaults to the current unix time, `duration` to 90 seconds.
    pub async fn register(
        &mut self,
        artist: impl Into<String>,
        title: impl Into<String>,
        performance_date: Option<i64>,
        duration: Option<u32>,
    ) -> Result<String> {
        let command = Command::register(artist, title, performance_date, duration);
        if let Command::Register {
            performance_date, ..
        } = &command
        {
            info!("Requesting token for time {}", performance_date);
        }
        self.request(&command).await
    }

    /// Update session metadata. Fields in `updated_info` override `action` and `token`.
    pub async fn update(
        &mut self,
        token: impl Into<String>,
        updated_info: Map<String, Value>,
    ) -> Result<String> {
        let command = Command::Update {
            token: token.into(),
            fields: updated_info,
        };
        self.request(&command).await
    }

    /// Publish a heart rate sample. No reply is expected.
    pub async fn publish(&mut self, token: impl Into<String>, heartrate: u32) -> Result<()> {
        let command = Command::Publish {
            token: token.into(),
            heartrate,
        };
        self.send(&command).await
    }

    /// Wait for the next inbound frame.
    pub async fn wait_for_data(&mut self) -> Result<String> {
        self.receive(Action::Receive).await
    }

    /// Frames received but not yet consumed. Zero when no connection is held.
    pub fn peek_receive_buffer_depth(&self) -> usize {
        match &self.state {
            State::Open(conn) => conn.buffered(),
            _ => 0,
        }
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        match &mut self.state {
            State::Open(conn) => Ok(conn),
            _ => Err(ClientError::NotConnected),
        }
    }

    async fn send(&mut self, command: &Command) -> Result<()> {
        let action = command.action();
        let conn = self.connection_mut()?;
        let frame = command.to_frame()?;
        debug!("Sending {} frame: {}", action, frame);
        conn.send_text(frame)
            .await
            .map_err(|source| ClientError::Send { action, source })
    }

    async fn request(&mut self, command: &Command) -> Result<String> {
        self.send(command).await?;
        self.receive(command.action()).await
    }

    async fn receive(&mut self, action: Action) -> Result<String> {
        let read_timeout = self.config.read_timeout;
        let conn = self.connection_mut()?;

        let next = match read_timeout {
            Some(timeout) => {
                let waited = tokio::time::timeout(timeout, conn.recv_text()).await;
                match waited {
                    Ok(next) => next,
                    Err(_) => {
                        if action != Action::Receive {
                            self.drop_desynced_connection(action).await;
                        }
                        return Err(ClientError::Timeout { action, timeout });
                    }
                }
            }
            None => conn.recv_text().await,
        };

        match next {
            Some(Ok(text)) => {
                debug!("Received {} frame: {}", action, text);
                Ok(text)
            }
            Some(Err(source)) => Err(ClientError::Receive { action, source }),
            None => Err(ClientError::ConnectionClosed { action }),
        }
    }

    /// The reply to `action` is still outstanding, so the stream can no longer
    /// be correlated. Close it; later requests fail with `NotConnected`.
    async fn drop_desynced_connection(&mut self, action: Action) {
        if let State::Open(conn) = std::mem::replace(&mut self.state, State::Closed) {
            warn!("No {} reply in time, closing connection", action);
            if let Err(e) = conn.close(self.config.close_timeout).await {
                debug!("Error closing desynced connection: {}", e);
            }
        }
    }
}
