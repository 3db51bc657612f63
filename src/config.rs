//! Per-device configuration.
//!
//! Loaded from TOML or constructed in code; every field has a sensible
//! default so `CameraConfig::default()` works for most cameras.
//!
//! ```toml
//! [camera]
//! buffer_count = 8
//! max_frame_wait_ms = 100
//! settle_time_ms = 300
//! ```

use serde::Deserialize;

use crate::error::{CamResult, CameraError};

/// Tunables for one open camera.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CameraConfig {
    /// Number of pre-allocated frame buffers.
    pub buffer_count: usize,
    /// Upper clamp on the per-iteration frame wait, in milliseconds.
    /// Bounds how long a stop request can be starved by acquisition.
    pub max_frame_wait_ms: u64,
    /// Hardware settle delay before re-arming capture after a
    /// reconfiguration, in milliseconds.
    pub settle_time_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            buffer_count: 8,
            max_frame_wait_ms: 100,
            settle_time_ms: 300,
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    camera: CameraConfig,
}

impl CameraConfig {
    /// Parses a `[camera]` table from TOML text.
    pub fn from_toml(text: &str) -> CamResult<Self> {
        let file: ConfigFile = toml::from_str(text)
            .map_err(|e| CameraError::system(format!("config parse: {e}")))?;
        file.camera.validate()?;
        Ok(file.camera)
    }

    /// Rejects configurations the streaming core cannot run with.
    pub fn validate(&self) -> CamResult<()> {
        if self.buffer_count == 0 {
            return Err(CameraError::MemAlloc(
                "buffer_count must be at least 1".to_string(),
            ));
        }
        if self.max_frame_wait_ms == 0 {
            return Err(CameraError::system("max_frame_wait_ms must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CameraConfig::default();
        assert_eq!(config.buffer_count, 8);
        assert_eq!(config.max_frame_wait_ms, 100);
        assert_eq!(config.settle_time_ms, 300);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = CameraConfig::from_toml("[camera]\nbuffer_count = 4\n").unwrap();
        assert_eq!(config.buffer_count, 4);
        assert_eq!(config.max_frame_wait_ms, 100);
    }

    #[test]
    fn rejects_zero_buffers() {
        assert!(CameraConfig::from_toml("[camera]\nbuffer_count = 0\n").is_err());
    }
}
