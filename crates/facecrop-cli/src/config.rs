use anyhow::{Context, Result};
use facecrop_core::ProcessorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: defaults, then an optional TOML file, then
/// `FACECROP_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX detection model.
    pub model_dir: PathBuf,
    pub processor: ProcessorConfig,
}

/// On-disk layout of the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    processor: ProcessorConfig,
}

impl Config {
    /// Load configuration. `file` wins over `FACECROP_CONFIG` when both are set.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACECROP_CONFIG").ok().map(PathBuf::from));

        let base = match &file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                let parsed: FileConfig = toml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?;
                tracing::debug!(path = %path.display(), "loaded config file");
                parsed
            }
            None => FileConfig::default(),
        };

        let config = Self::apply_env(base);
        config.processor.validate().context("invalid processor config")?;
        Ok(config)
    }

    fn apply_env(base: FileConfig) -> Self {
        let model_dir = std::env::var("FACECROP_MODEL_DIR")
            .map(PathBuf::from)
            .ok()
            .or(base.model_dir)
            .unwrap_or_else(default_model_dir);

        let defaults = base.processor;
        let processor = ProcessorConfig {
            detect_timeout_secs: env_or("FACECROP_DETECT_TIMEOUT_SECS", defaults.detect_timeout_secs),
            max_concurrent_detections: env_or(
                "FACECROP_MAX_DETECTIONS",
                defaults.max_concurrent_detections,
            ),
            jpeg_quality: env_or("FACECROP_JPEG_QUALITY", defaults.jpeg_quality),
        };

        Self { model_dir, processor }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(facecrop_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// `$XDG_DATA_HOME/facecrop/models`, falling back to `~/.local/share`.
fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecrop")
        .join("models")
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_partial_toml() {
        let parsed: FileConfig = toml::from_str(
            r#"
            model_dir = "/opt/models"

            [processor]
            jpeg_quality = 92
            "#,
        )
        .unwrap();
        assert_eq!(parsed.model_dir, Some(PathBuf::from("/opt/models")));
        assert_eq!(parsed.processor.jpeg_quality, 92);
        assert_eq!(parsed.processor.detect_timeout_secs, 10);
    }

    #[test]
    fn test_file_config_empty_toml() {
        let parsed: FileConfig = toml::from_str("").unwrap();
        assert!(parsed.model_dir.is_none());
        assert_eq!(parsed.processor, ProcessorConfig::default());
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let path = std::env::temp_dir().join(format!("facecrop-zero-timeout-{}.toml", std::process::id()));
        std::fs::write(&path, "[processor]\ndetect_timeout_secs = 0\n").unwrap();
        let result = Config::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("detect_timeout_secs must be at least 1"), "{err:#}");
    }

    #[test]
    fn test_env_or_falls_back_on_missing_key() {
        assert_eq!(env_or("FACECROP_TEST_UNSET_KEY_7F3A", 42u64), 42);
    }

    #[test]
    fn test_scrfd_model_path() {
        let config = Config {
            model_dir: PathBuf::from("/opt/models"),
            processor: ProcessorConfig::default(),
        };
        assert_eq!(config.scrfd_model_path(), "/opt/models/det_10g.onnx");
    }
}
