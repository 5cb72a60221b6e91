//! Decoder configuration types
//!
//! This module defines the minimal configuration needed by the decoder
//! library. The decoder is intentionally simple - signal extraction,
//! storage and analytics belong to the application layer.

use serde::{Deserialize, Serialize};

/// Configuration for the decoder library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Optional: only decode frames from these capture channels
    #[serde(default)]
    pub channel_filter: Option<Vec<String>>,

    /// Optional: evict transport sessions idle for longer than this many
    /// seconds of capture time. `None` keeps abandoned sessions forever,
    /// matching the wire protocol (which has no timeout of its own).
    #[serde(default)]
    pub session_idle_timeout: Option<f64>,

    /// Whether to emit non-transport single-frame messages. Disable to
    /// receive only reassembled multi-frame messages.
    #[serde(default = "default_true")]
    pub passthrough_single_frames: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            channel_filter: None,
            session_idle_timeout: None,
            passthrough_single_frames: true,
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set channel filter
    pub fn with_channel_filter(mut self, channels: Vec<String>) -> Self {
        self.channel_filter = Some(channels);
        self
    }

    /// Builder method: set the session idle timeout in seconds
    pub fn with_session_idle_timeout(mut self, seconds: f64) -> Self {
        self.session_idle_timeout = Some(seconds);
        self
    }

    /// Builder method: enable or disable single-frame pass-through
    pub fn with_passthrough(mut self, enabled: bool) -> Self {
        self.passthrough_single_frames = enabled;
        self
    }

    /// Check if a channel should be processed
    pub fn should_process_channel(&self, channel: &str) -> bool {
        match &self.channel_filter {
            Some(channels) => channels.iter().any(|c| c == channel),
            None => true,
        }
    }
}
