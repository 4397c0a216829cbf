use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("detect_timeout_secs must be at least 1")]
    ZeroTimeout,
}

/// Tunables for a [`crate::FaceCropper`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Upper bound on a single detector call.
    pub detect_timeout_secs: u64,
    /// Detector calls allowed in flight at once.
    pub max_concurrent_detections: usize,
    /// JPEG quality of the encoded output (1–100).
    pub jpeg_quality: u8,
}

impl ProcessorConfig {
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_timeout_secs)
    }

    /// Reject settings that would fail every request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detect_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            detect_timeout_secs: 10,
            max_concurrent_detections: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            jpeg_quality: 75,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.detect_timeout(), Duration::from_secs(10));
        assert!(config.max_concurrent_detections >= 1);
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ProcessorConfig {
            detect_timeout_secs: 0,
            ..ProcessorConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }
}
