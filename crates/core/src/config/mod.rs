use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, WaveplayError};

/// Slowest update rate that still yields smooth progress drawing.
pub const MIN_UPDATE_RATE_HZ: f64 = 20.0;

/// Which backend variant a controller starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fully decodes the source into memory before playing.
    #[default]
    Decoded,
    /// Plays while data continues to arrive.
    Streaming,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decoded => "decoded",
            Self::Streaming => "streaming",
        }
    }
}

/// Top-level configuration for a player controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Seconds skipped by `skip_forward`/`skip_backward` without an explicit offset.
    pub skip_length: f64,
    /// Rate at which backends invoke their bound update callback while playing.
    pub update_rate_hz: f64,
    /// Normalisation granularity for marker matching. `None` uses the
    /// renderer width.
    pub marker_resolution: Option<u32>,
    pub backend: BackendKind,
    /// Nominal bitrate used by the built-in streaming element to turn received
    /// bytes into seconds.
    pub stream_bitrate_kbps: u32,
    /// Buffered seconds after which a streaming element reports it can play.
    pub can_play_seconds: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            skip_length: 2.0,
            update_rate_hz: 30.0,
            marker_resolution: None,
            backend: BackendKind::Decoded,
            stream_bitrate_kbps: 128,
            can_play_seconds: 0.5,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Seconds between two update callbacks.
    pub fn update_interval(&self) -> f64 {
        1.0 / self.update_rate_hz
    }

    /// Bytes the built-in streaming element treats as one second of audio.
    pub fn stream_bytes_per_second(&self) -> f64 {
        f64::from(self.stream_bitrate_kbps) * 1000.0 / 8.0
    }

    pub fn validate(&self) -> Result<()> {
        if !self.skip_length.is_finite() || self.skip_length <= 0.0 {
            return Err(WaveplayError::Config(format!(
                "skip_length must be a positive number of seconds, got {}",
                self.skip_length
            )));
        }
        if !self.update_rate_hz.is_finite() || self.update_rate_hz < MIN_UPDATE_RATE_HZ {
            return Err(WaveplayError::Config(format!(
                "update_rate_hz must be at least {MIN_UPDATE_RATE_HZ}, got {}",
                self.update_rate_hz
            )));
        }
        if self.marker_resolution == Some(0) {
            return Err(WaveplayError::Config(
                "marker_resolution must be greater than zero".to_string(),
            ));
        }
        if self.stream_bitrate_kbps == 0 {
            return Err(WaveplayError::Config(
                "stream_bitrate_kbps must be greater than zero".to_string(),
            ));
        }
        if !self.can_play_seconds.is_finite() || self.can_play_seconds < 0.0 {
            return Err(WaveplayError::Config(format!(
                "can_play_seconds must not be negative, got {}",
                self.can_play_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlayerConfig::default();
        assert_eq!(config.skip_length, 2.0);
        assert_eq!(config.backend, BackendKind::Decoded);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            PlayerConfig::from_json_str(r#"{ "skip_length": 5, "backend": "streaming" }"#).unwrap();
        assert_eq!(config.skip_length, 5.0);
        assert_eq!(config.backend, BackendKind::Streaming);
        assert_eq!(config.update_rate_hz, 30.0);
    }

    #[test]
    fn rejects_slow_update_rates() {
        let err = PlayerConfig::from_json_str(r#"{ "update_rate_hz": 4 }"#).unwrap_err();
        assert!(err.to_string().contains("update_rate_hz"));
    }

    #[test]
    fn rejects_non_positive_skip_length() {
        let config = PlayerConfig {
            skip_length: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WaveplayError::Config(_))));
    }

    #[test]
    fn reads_configuration_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        std::fs::write(&path, r#"{ "marker_resolution": 1000 }"#).unwrap();

        let config = PlayerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.marker_resolution, Some(1000));
    }
}
