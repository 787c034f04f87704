//! Configuration types for the avatar session manager

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for an avatar session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarSessionConfig {
    /// Remote control API
    pub api: ApiConfig,

    /// Which avatar/voice to stream
    pub avatar: AvatarProfile,

    /// Peer transport (STUN/TURN, timeouts)
    pub transport: TransportConfig,

    /// Frame compositing
    pub compositor: CompositorConfig,

    /// Speech scheduling
    pub speech: SpeechConfig,
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the avatar service (http:// or https://)
    pub base_url: String,

    /// Static API key sent with every request
    pub api_key: String,

    /// Header carrying the API key (default: x-api-key)
    pub api_key_header: String,

    /// Per-request timeout in seconds (default: 30, range: 1-300)
    pub request_timeout_secs: u64,

    /// Endpoint paths
    pub endpoints: ApiEndpoints,
}

/// Control API endpoint paths, relative to `base_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpoints {
    pub create: String,
    pub answer: String,
    pub ice: String,
    pub speak: String,
    pub stop: String,
}

/// Avatar selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarProfile {
    /// Remote avatar identifier
    pub avatar_id: String,

    /// Remote voice identifier (service default if None)
    pub voice_id: Option<String>,

    /// Stream quality (default: medium)
    pub quality: Quality,
}

/// Stream quality requested from the avatar service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl std::str::FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(Error::InvalidConfig(format!(
                "quality must be low, medium or high, got {}",
                other
            ))),
        }
    }
}

/// Peer transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// STUN server URLs used in addition to the servers the avatar service hands out
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Time allowed to reach `connected` after negotiation (default: 30)
    pub connect_timeout_secs: u64,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Frame compositor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Render loop period in milliseconds (default: 16, ~60 Hz)
    pub frame_interval_ms: u64,

    /// Green-screen removal thresholds
    pub chroma_key: ChromaKeyConfig,
}

/// Chroma-key thresholds. A pixel is keyed out when
/// `g > green_min && r < red_max && b < blue_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaKeyConfig {
    pub enabled: bool,
    pub green_min: u8,
    pub red_max: u8,
    pub blue_max: u8,
}

/// Speech scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Duration hint used when the service omits `duration_ms` (default: 1000)
    pub fallback_duration_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://avatar.example.com".to_string(),
            api_key: String::new(),
            api_key_header: "x-api-key".to_string(),
            request_timeout_secs: 30,
            endpoints: ApiEndpoints::default(),
        }
    }
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            create: "/v1/streaming.new".to_string(),
            answer: "/v1/streaming.start".to_string(),
            ice: "/v1/streaming.ice".to_string(),
            speak: "/v1/streaming.task".to_string(),
            stop: "/v1/streaming.stop".to_string(),
        }
    }
}

impl Default for AvatarProfile {
    fn default() -> Self {
        Self {
            avatar_id: "default".to_string(),
            voice_id: None,
            quality: Quality::Medium,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            connect_timeout_secs: 30,
        }
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            chroma_key: ChromaKeyConfig::default(),
        }
    }
}

impl Default for ChromaKeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            green_min: 90,
            red_max: 90,
            blue_max: 90,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            fallback_duration_ms: 1000,
        }
    }
}

impl ApiConfig {
    /// Full URL for an endpoint path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl CompositorConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Reject render cadences the frame loop cannot run at
    pub fn validate(&self) -> Result<()> {
        if self.frame_interval_ms == 0 || self.frame_interval_ms > 1000 {
            return Err(Error::InvalidConfig(format!(
                "compositor.frame_interval_ms must be in range 1-1000, got {}",
                self.frame_interval_ms
            )));
        }
        Ok(())
    }
}

impl SpeechConfig {
    pub fn fallback_duration(&self) -> Duration {
        Duration::from_millis(self.fallback_duration_ms)
    }
}

impl AvatarSessionConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `api.base_url` is not an http(s) URL
    /// - `api.request_timeout_secs` is not in range 1-300
    /// - `avatar.avatar_id` is empty
    /// - a STUN/TURN URL has the wrong scheme
    /// - `compositor.frame_interval_ms` is not in range 1-1000
    pub fn validate(&self) -> Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "api.base_url must start with http:// or https://, got {}",
                self.api.base_url
            )));
        }

        if self.api.api_key_header.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "api.api_key_header cannot be empty".to_string(),
            ));
        }

        if self.api.request_timeout_secs == 0 || self.api.request_timeout_secs > 300 {
            return Err(Error::InvalidConfig(format!(
                "api.request_timeout_secs must be in range 1-300, got {}",
                self.api.request_timeout_secs
            )));
        }

        if self.avatar.avatar_id.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "avatar.avatar_id cannot be empty".to_string(),
            ));
        }

        if let Some(url) = self
            .transport
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "stun server must start with stun: or stuns:, got {}",
                url
            )));
        }

        if let Some(turn) = self
            .transport
            .turn_servers
            .iter()
            .find(|t| !t.url.starts_with("turn:") && !t.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "turn server must start with turn: or turns:, got {}",
                turn.url
            )));
        }

        if self.transport.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "transport.connect_timeout_secs must be positive".to_string(),
            ));
        }

        self.compositor.validate()
    }
}
