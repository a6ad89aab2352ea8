use std::time::Duration;

use url::Url;

use crate::auth::ApiToken;
use crate::error::{CIPulseError, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

const CHANNEL_PATH: &str = "ws/dashboard/websocket";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub token: Option<ApiToken>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_url: &str) -> Result<Self> {
        Ok(Self {
            api_url: parse_base_url(api_url)?,
            token: None,
            timeout: Duration::from_secs(30),
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<ApiToken>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub endpoint: Url,
    pub topic: String,
    pub subscribe_destination: String,
    pub pipeline_topic_prefix: String,
    pub base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl ChannelConfig {
    /// Broker endpoint lives next to the REST API, on the websocket scheme.
    pub fn from_api_url(api_url: &Url) -> Result<Self> {
        let mut endpoint = api_url
            .join(CHANNEL_PATH)
            .map_err(|e| CIPulseError::Config(format!("Invalid channel URL: {e}")))?;

        let scheme = match endpoint.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        endpoint
            .set_scheme(scheme)
            .map_err(|()| CIPulseError::Config(format!("Cannot use {scheme} for {endpoint}")))?;

        Ok(Self {
            endpoint,
            topic: "/topic/dashboard".to_string(),
            subscribe_destination: "/app/dashboard/subscribe".to_string(),
            pipeline_topic_prefix: "/topic/pipeline/".to_string(),
            base_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 5,
        })
    }

    /// Delay before reconnection attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }

    pub fn pipeline_topic(&self, pipeline_id: u64) -> String {
        format!("{}{pipeline_id}", self.pipeline_topic_prefix)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub refresh_settle_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            refresh_settle_delay: Duration::from_millis(500),
        }
    }
}

// Relative joins need a trailing slash on the base path.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| CIPulseError::Config(format!("Invalid API URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CIPulseError::Config(format!(
            "API URL must be http or https, got {}",
            url.scheme()
        )));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}
