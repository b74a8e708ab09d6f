use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::RtcError;

/// Video session subsystem configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Base URL of the platform the client is served from. The WebSocket
    /// scheme is derived from it: a securely served page signals over `wss`.
    pub base_url: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl SignalingConfig {
    /// Relay endpoint for video sessions, scheme-matched to `base_url`.
    pub fn ws_endpoint(&self) -> Result<Url, RtcError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| RtcError::InvalidConfig(format!("signaling.base_url: {e}")))?;

        let scheme = match base.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(RtcError::InvalidConfig(format!(
                    "signaling.base_url has unsupported scheme '{other}'"
                )))
            }
        };
        let host = base
            .host_str()
            .ok_or_else(|| RtcError::InvalidConfig("signaling.base_url has no host".to_string()))?;

        let mut endpoint = format!("{scheme}://{host}");
        if let Some(port) = base.port() {
            endpoint.push_str(&format!(":{port}"));
        }
        endpoint.push_str("/ws/video-sessions");

        Url::parse(&endpoint).map_err(|e| RtcError::InvalidConfig(format!("ws endpoint: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// STUN server URLs handed to the peer connection. No TURN relay is
    /// configured: peers behind symmetric NAT may fail to connect.
    pub stun_servers: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
        }
    }
}

/// Capture constraints applied when acquiring local media
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Camera resolution requested in the pre-call lobby
    pub lobby_width: u32,
    pub lobby_height: u32,
    /// Camera resolution requested once actually in-call
    pub call_width: u32,
    pub call_height: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            lobby_width: 640,
            lobby_height: 480,
            call_width: 1280,
            call_height: 720,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl RtcConfig {
    /// Load configuration from a file, layered with `VITALINK_`-prefixed
    /// environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("VITALINK").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigBuilder::builder()
            .add_source(Environment::with_prefix("VITALINK").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.signaling.ws_endpoint() {
            errors.push(e.to_string());
        }
        for server in &self.ice.stun_servers {
            if !server.starts_with("stun:") && !server.starts_with("stuns:") {
                errors.push(format!("ice.stun_servers entry '{server}' is not a STUN URL"));
            }
        }
        if self.media.lobby_width == 0 || self.media.lobby_height == 0 {
            errors.push("media.lobby resolution must be non-zero".to_string());
        }
        if self.media.call_width == 0 || self.media.call_height == 0 {
            errors.push("media.call resolution must be non-zero".to_string());
        }
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "warning" | "error" => {}
            other => errors.push(format!("logging.level '{other}' is not a valid level")),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
