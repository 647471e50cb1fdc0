use std::fmt;
use std::time::Duration;

use crate::core::{
    ConnectionProperties, ExponentialBackoffReconnect, IdentifyPayload, Intents, PresenceUpdate,
    WebSocketBufferConfig, WsTlsConfig,
};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
pub const DEFAULT_API_VERSION: u8 = 10;

/// Backoff parameters for reconnects after the first successful handshake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn strategy(&self) -> ExponentialBackoffReconnect {
        let backoff = ExponentialBackoffReconnect::new(self.base, self.max, self.factor);
        match self.max_attempts {
            Some(attempts) => backoff.with_max_attempts(attempts),
            None => backoff,
        }
    }
}

/// Everything a gateway client needs to connect and identify.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
    /// Base websocket URL; version and encoding are appended by [`GatewayConfig::gateway_url`].
    pub url: String,
    pub api_version: u8,
    pub properties: ConnectionProperties,
    pub large_threshold: Option<u16>,
    /// Presence sent with IDENTIFY.
    pub presence: Option<PresenceUpdate>,
    pub reconnect: ReconnectConfig,
    /// Treat a heartbeat tick with the previous heartbeat still unacknowledged as a dead
    /// connection.
    pub zombie_detection: bool,
    /// Outbound application commands allowed per `command_window`.
    pub command_limit: u32,
    pub command_window: Duration,
    pub buffers: WebSocketBufferConfig,
    pub tls: WsTlsConfig,
    pub connect_timeout: Duration,
    /// Upper bound from socket open to READY/RESUMED.
    pub handshake_timeout: Duration,
    /// Name used in log fields; defaults to the URL.
    pub label: Option<String>,
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            intents,
            url: DEFAULT_GATEWAY_URL.to_string(),
            api_version: DEFAULT_API_VERSION,
            properties: ConnectionProperties::default(),
            large_threshold: None,
            presence: None,
            reconnect: ReconnectConfig::default(),
            zombie_detection: true,
            command_limit: 120,
            command_window: Duration::from_secs(60),
            buffers: WebSocketBufferConfig::default(),
            tls: WsTlsConfig::default(),
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(60),
            label: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_api_version(mut self, version: u8) -> Self {
        self.api_version = version;
        self
    }

    pub fn with_properties(mut self, properties: ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_large_threshold(mut self, threshold: u16) -> Self {
        self.large_threshold = Some(threshold);
        self
    }

    pub fn with_presence(mut self, presence: PresenceUpdate) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_zombie_detection(mut self, enabled: bool) -> Self {
        self.zombie_detection = enabled;
        self
    }

    pub fn with_command_limit(mut self, limit: u32, window: Duration) -> Self {
        self.command_limit = limit;
        self.command_window = window;
        self
    }

    pub fn with_buffers(mut self, buffers: WebSocketBufferConfig) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn with_tls(mut self, tls: WsTlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }

    pub fn gateway_url(&self) -> String {
        self.url_for(&self.url)
    }

    /// Append the version and encoding query to `base` (the configured URL or a resume URL).
    pub fn url_for(&self, base: &str) -> String {
        format!(
            "{}/?v={}&encoding=json",
            base.trim_end_matches('/'),
            self.api_version
        )
    }

    pub fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.token.clone(),
            intents: self.intents.bits(),
            properties: self.properties.clone(),
            large_threshold: self.large_threshold,
            presence: self.presence.clone(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("url", &self.url)
            .field("api_version", &self.api_version)
            .field("properties", &self.properties)
            .field("large_threshold", &self.large_threshold)
            .field("presence", &self.presence)
            .field("reconnect", &self.reconnect)
            .field("zombie_detection", &self.zombie_detection)
            .field("command_limit", &self.command_limit)
            .field("command_window", &self.command_window)
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("label", &self.label)
            .finish()
    }
}
