use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use heartbridge::{ClientConfig, HeartbridgeClient};
use log::{info, warn};
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "heartbridge")]
#[command(about = "Client for the heartbridge streaming service")]
#[command(long_about = "
Client for the heartbridge streaming service.

Defaults are read from the environment (HEARTBRIDGE_URL, HEARTBRIDGE_MAX_RETRIES,
HEARTBRIDGE_BACKOFF_MS, HEARTBRIDGE_READ_TIMEOUT_MS) and a .env file if present.

EXAMPLES:
  # Register a performance and print the reply (contains the session token)
  heartbridge --url ws://localhost:8765 register --artist \"Band\" --title \"Live\"

  # Stream heart rate samples for a session
  heartbridge publish TOKEN 72 75 81 --interval-ms 1000

  # Follow updates for a performance
  heartbridge subscribe perf-42
")]
struct Args {
    /// WebSocket endpoint, e.g. ws://localhost:8765
    #[arg(long)]
    url: Option<String>,

    /// Maximum connect retries before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Fail a reply wait after this many milliseconds
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Register a performance and print the server reply
    Register {
        #[arg(long)]
        artist: String,
        #[arg(long)]
        title: String,
        /// Unix timestamp in seconds (default: now)
        #[arg(long)]
        date: Option<i64>,
        /// Duration in seconds (default: 90)
        #[arg(long)]
        duration: Option<u32>,
    },
    /// Subscribe to a performance and print pushed frames
    Subscribe {
        performance_id: String,
        /// Stop after this many frames
        #[arg(long)]
        count: Option<usize>,
    },
    /// Update session metadata with key=value pairs
    Update {
        token: String,
        /// Values are parsed as JSON, falling back to plain strings
        #[arg(value_parser = parse_field, required = true)]
        fields: Vec<(String, Value)>,
    },
    /// Publish one or more heart rate samples
    Publish {
        token: String,
        #[arg(required = true)]
        bpm: Vec<u32>,
        /// Delay between samples
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ClientConfig::from_env().context("invalid environment configuration")?;
    if let Some(url) = args.url {
        config.endpoint = Some(url);
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }
    if let Some(ms) = args.read_timeout_ms {
        config.read_timeout = Some(Duration::from_millis(ms));
    }

    let mut client = HeartbridgeClient::with_config(config);
    client
        .connect(None, None)
        .await
        .context("could not connect to heartbridge server")?;
    info!("🔗 Connection id: {}", client.connection_id()?);

    let outcome = run(&mut client, args.command).await;

    if let Err(e) = client.close().await {
        warn!("Failed to close connection cleanly: {}", e);
    }
    outcome
}

async fn run(client: &mut HeartbridgeClient, command: Cmd) -> Result<()> {
    match command {
        Cmd::Register {
            artist,
            title,
            date,
            duration,
        } => {
            let reply = client.register(artist, title, date, duration).await?;
            println!("{reply}");
        }
        Cmd::Subscribe {
            performance_id,
            count,
        } => {
            client.subscribe(performance_id).await?;
            let mut received = 0;
            while count.map_or(true, |limit| received < limit) {
                let frame = client.wait_for_data().await?;
                received += 1;
                println!("{frame}");
            }
        }
        Cmd::Update { token, fields } => {
            let fields: Map<String, Value> = fields.into_iter().collect();
            let reply = client.update(token, fields).await?;
            println!("{reply}");
        }
        Cmd::Publish {
            token,
            bpm,
            interval_ms,
        } => {
            let interval = Duration::from_millis(interval_ms);
            let total = bpm.len();
            for (i, heartrate) in bpm.into_iter().enumerate() {
                client.publish(token.as_str(), heartrate).await?;
                info!("💓 Published {} bpm ({}/{})", heartrate, i + 1, total);
                if i + 1 < total {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_json_and_string_values() {
        assert_eq!(
            parse_field("duration=120").unwrap(),
            ("duration".to_string(), Value::from(120))
        );
        assert_eq!(
            parse_field("title=New Song").unwrap(),
            ("title".to_string(), Value::from("New Song"))
        );
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=x").is_err());
    }

    #[test]
    fn test_cli_parses_publish() {
        let args = Args::try_parse_from(["heartbridge", "--url", "ws://h:1", "publish", "tok", "70", "71"])
            .unwrap();
        match args.command {
            Cmd::Publish { token, bpm, interval_ms } => {
                assert_eq!(token, "tok");
                assert_eq!(bpm, vec![70, 71]);
                assert_eq!(interval_ms, 1000);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
