use crate::retry::ReconnectPolicy;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Well-known path of the dashboard feed on the tunnel server
pub const DEFAULT_FEED_PATH: &str = "/api/ws/dashboard";

/// Default bound on a single connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_ORIGIN: &str = "http://localhost:8080";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported origin scheme in {0:?} (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
    #[error("Origin {0:?} has no host")]
    MissingHost(String),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Whether the hosting page was served securely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Secure,
    Insecure,
}

impl Scheme {
    /// Socket scheme mirroring the page scheme
    pub fn socket_scheme(self) -> &'static str {
        match self {
            Scheme::Secure => "wss",
            Scheme::Insecure => "ws",
        }
    }
}

/// Scheme and host (with optional port) of the server hosting the dashboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: Scheme,
    pub host: String,
}

impl Origin {
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Self {
        Self {
            scheme,
            host: host.into(),
        }
    }

    /// Parse an origin such as `https://bore.example.com` or `http://localhost:8080`.
    ///
    /// Socket schemes are accepted too. Any path after the host is ignored.
    pub fn parse(origin: &str) -> Result<Self, ConfigError> {
        let trimmed = origin.trim();
        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| ConfigError::UnsupportedScheme(origin.to_string()))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "https" | "wss" => Scheme::Secure,
            "http" | "ws" => Scheme::Insecure,
            _ => return Err(ConfigError::UnsupportedScheme(origin.to_string())),
        };

        let host = rest.split('/').next().unwrap_or_default();
        if host.is_empty() {
            return Err(ConfigError::MissingHost(origin.to_string()));
        }

        Ok(Self::new(scheme, host))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Secure => "https",
            Scheme::Insecure => "http",
        };
        write!(f, "{}://{}", scheme, self.host)
    }
}

/// Everything the feed client needs to know, injected at construction
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub origin: Origin,
    pub path: String,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl FeedConfig {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            path: DEFAULT_FEED_PATH.to_string(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Full socket URL, e.g. `wss://bore.example.com/api/ws/dashboard`
    pub fn feed_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.origin.scheme.socket_scheme(),
            self.origin.host,
            self.path
        )
    }

    /// Configuration from environment variables:
    ///
    /// - `BORE_DASH_ORIGIN` (default `http://localhost:8080`)
    /// - `BORE_DASH_RECONNECT_MS` (default 3000)
    /// - `BORE_DASH_CONNECT_TIMEOUT_MS` (default 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let origin =
            std::env::var("BORE_DASH_ORIGIN").unwrap_or_else(|_| DEFAULT_ORIGIN.to_string());
        let mut config = Self::new(Origin::parse(&origin)?);

        if let Some(ms) = env_millis("BORE_DASH_RECONNECT_MS")? {
            config.reconnect = ReconnectPolicy::fixed(ms);
        }
        if let Some(ms) = env_millis("BORE_DASH_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = ms;
        }

        Ok(config)
    }
}

fn env_millis(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}
