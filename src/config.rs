use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_RETRIES: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Connection settings for [`crate::HeartbridgeClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remembered target; `connect(Some(url), ..)` replaces it.
    pub endpoint: Option<String>,
    pub max_retries: u32,
    /// The wait before retry `n` is `n * backoff_unit`.
    pub backoff_unit: Duration,
    /// `None` waits for replies indefinitely.
    pub read_timeout: Option<Duration>,
    /// How long `close()` waits for the server's close reply.
    pub close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit: Duration::from_secs(1),
            read_timeout: None,
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    /// Load configuration from the environment, reading `.env` first if present.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(url) = Self::read_var("HEARTBRIDGE_URL")? {
            config.endpoint = Some(url);
        }
        if let Some(retries) = Self::read_number::<u32>("HEARTBRIDGE_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(ms) = Self::read_number::<u64>("HEARTBRIDGE_BACKOFF_MS")? {
            config.backoff_unit = Duration::from_millis(ms);
        }
        if let Some(ms) = Self::read_number::<u64>("HEARTBRIDGE_READ_TIMEOUT_MS")? {
            // 0 keeps the blocking default
            config.read_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = Self::read_number::<u64>("HEARTBRIDGE_CLOSE_TIMEOUT_MS")? {
            config.close_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    fn read_var(var: &str) -> Result<Option<String>, ConfigError> {
        match env::var(var) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_number<T>(var: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(value) = Self::read_var(var)? else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                reason: e.to_string(),
                value,
            })
    }
}
