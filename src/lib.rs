//! # Heartbridge
//!
//! Client for the heartbridge streaming service: one persistent WebSocket,
//! connect with linear backoff, and the `subscribe` / `register` / `update` /
//! `publish` JSON actions.
//!
//! ```rust,no_run
//! use heartbridge::HeartbridgeClient;
//!
//! # async fn run() -> heartbridge::Result<()> {
//! let mut client = HeartbridgeClient::new("ws://localhost:8765");
//! client.connect(None, None).await?;
//!
//! let reply = client.register("Artist", "Title", None, None).await?;
//! println!("registered: {reply}");
//!
//! client.publish("session-token", 72).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{ConnectionState, HeartbridgeClient};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, Result};
pub use protocol::{Action, Command};
