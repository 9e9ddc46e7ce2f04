//! Client configuration.
//!
//! A `ClientConfig` is validated once at construction and read-only after
//! that. `Client::reconfigure` swaps in a whole new value; every started call
//! keeps the snapshot it began with.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WORKERS: usize = 4;

/// How a response body is decoded into `Data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadType {
    /// A JSON document whose top level is an object.
    #[default]
    JsonObject,
    /// Any JSON value.
    Json,
    /// UTF-8 text.
    Text,
    /// Raw bytes, no decoding.
    Bytes,
}

impl FromStr for PayloadType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json-object" | "json_object" | "object" => Ok(PayloadType::JsonObject),
            "json" => Ok(PayloadType::Json),
            "text" => Ok(PayloadType::Text),
            "bytes" => Ok(PayloadType::Bytes),
            other => Err(ClientError::InvalidConfig(format!(
                "unknown payload type: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: String,
    timeout: Duration,
    payload: PayloadType,
    workers: usize,
}

impl ClientConfig {
    pub fn new(base_url: &str, timeout_ms: u64, payload: PayloadType) -> ClientResult<Self> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(ClientError::InvalidConfig("base URL is empty".to_string()));
        }
        if !is_absolute(base_url) {
            return Err(ClientError::InvalidConfig(format!(
                "base URL must start with http:// or https://: {base_url}"
            )));
        }
        if timeout_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            base_url: base_url.to_string(),
            timeout: Duration::from_millis(timeout_ms),
            payload,
            workers: DEFAULT_WORKERS,
        })
    }

    /// Build a configuration from `GRIDMI_BASE_URL`, `GRIDMI_TIMEOUT_MS`,
    /// `GRIDMI_PAYLOAD` and `GRIDMI_WORKERS`.
    pub fn from_env() -> ClientResult<Self> {
        let base_url = env::var("GRIDMI_BASE_URL")
            .map_err(|_| ClientError::InvalidConfig("GRIDMI_BASE_URL is not set".to_string()))?;
        let timeout_ms = match env::var("GRIDMI_TIMEOUT_MS") {
            Ok(v) => v.trim().parse::<u64>().map_err(|e| {
                ClientError::InvalidConfig(format!("GRIDMI_TIMEOUT_MS: {e}"))
            })?,
            Err(_) => DEFAULT_TIMEOUT_MS,
        };
        let payload = match env::var("GRIDMI_PAYLOAD") {
            Ok(v) => v.parse()?,
            Err(_) => PayloadType::default(),
        };
        let mut config = Self::new(&base_url, timeout_ms, payload)?;
        if let Ok(v) = env::var("GRIDMI_WORKERS") {
            let workers = v
                .trim()
                .parse::<usize>()
                .map_err(|e| ClientError::InvalidConfig(format!("GRIDMI_WORKERS: {e}")))?;
            config = config.with_workers(workers);
        }
        Ok(config)
    }

    /// Size of the worker pool. Values below one are raised to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn payload(&self) -> PayloadType {
        self.payload
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Join the base URL and a request path with exactly one slash.
    /// Absolute URLs are returned unchanged.
    pub fn resolve(&self, path: &str) -> String {
        if is_absolute(path) {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn is_absolute(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
