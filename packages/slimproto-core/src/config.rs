//! Server and per-player configuration surface.
//!
//! Loaded in layers: an optional YAML file, overridden by `SLIMPROTO_*`
//! environment variables, overridden again by CLI flags in `main.rs`.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::DEFAULT_SLIMPROTO_PORT;

/// Output codec preference order when auto-selecting from a client's
/// advertised capabilities: flac, then pcm, then mp3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCodec {
    Flac,
    Pcm,
    Mp3,
}

impl OutputCodec {
    /// Picks the most-preferred codec the client's capability string
    /// advertises, falling back to PCM (universally supported).
    #[must_use]
    pub fn negotiate(client_capabilities: &str) -> Self {
        const PREFERENCE: [(&str, OutputCodec); 3] = [
            ("flc", OutputCodec::Flac),
            ("pcm", OutputCodec::Pcm),
            ("mp3", OutputCodec::Mp3),
        ];
        PREFERENCE
            .into_iter()
            .find(|(tag, _)| client_capabilities.contains(tag))
            .map(|(_, codec)| codec)
            .unwrap_or(OutputCodec::Pcm)
    }
}

/// Per-player configuration, applied on registration and by `setd`-style
/// provider operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub sync_adjust_ms: i64,
    pub crossfade_duration_secs: u32,
    pub presets: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sync_adjust_ms: 0,
            crossfade_duration_secs: 0,
            presets: Vec::new(),
        }
    }
}

impl PlayerConfig {
    /// The number of preset slots offered, growing 5→10→15→20 as earlier
    /// slots fill.
    #[must_use]
    pub fn preset_slot_count(&self) -> u8 {
        use crate::protocol_constants::PRESET_SLOT_TIERS;
        let filled = self.presets.len();
        PRESET_SLOT_TIERS
            .into_iter()
            .find(|&tier| (filled as u8) < tier)
            .unwrap_or(*PRESET_SLOT_TIERS.last().unwrap())
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port the SlimProto socket server listens on.
    pub slimproto_port: u16,
    /// Whether to start the LAN discovery beacon at bootstrap.
    pub enable_discovery: bool,
    /// Carried as configuration only; this crate implements no telnet
    /// listener.
    pub enable_telnet: bool,
    /// Carried as configuration only; this crate implements no JSON-RPC
    /// listener.
    pub enable_json_rpc: bool,
    /// Event broadcast channel capacity.
    pub event_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            slimproto_port: DEFAULT_SLIMPROTO_PORT,
            enable_discovery: true,
            enable_telnet: false,
            enable_json_rpc: false,
            event_channel_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Loads config from an optional YAML file, then overrides any field
    /// present as a `SLIMPROTO_*` environment variable.
    pub fn load(yaml_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match yaml_path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
                serde_yaml::from_str(&contents)
                    .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("SLIMPROTO_PORT") {
            if let Ok(port) = port.parse() {
                self.slimproto_port = port;
            }
        }
        if let Ok(flag) = std::env::var("SLIMPROTO_ENABLE_DISCOVERY") {
            self.enable_discovery = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Ok(flag) = std::env::var("SLIMPROTO_ENABLE_TELNET") {
            self.enable_telnet = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Ok(flag) = std::env::var("SLIMPROTO_ENABLE_JSON_RPC") {
            self.enable_json_rpc = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, String),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, String),
}
