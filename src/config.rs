//! Configuration types for the voice chat client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the chat client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Generation backend settings.
    pub backend: BackendConfig,
    /// Spoken-reply settings.
    pub voice: VoiceConfig,
    /// Speech capture settings.
    pub capture: CaptureConfig,
}

/// Generation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend service.
    pub base_url: String,
    /// Model name sent with every chat request.
    pub model: String,
    /// Total request timeout in seconds (covers the whole streamed body).
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_owned(),
            model: "qwen2.5:1.5b".to_owned(),
            request_timeout_secs: 120,
        }
    }
}

/// Spoken-reply configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Whether completed assistant replies are spoken aloud.
    pub speak_responses: bool,
    /// Synthesis voice ID (None = backend default voice).
    pub voice: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            speak_responses: true,
            voice: None,
        }
    }
}

/// Speech capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Whether capture re-arms automatically after each utterance and reply.
    pub always_listen: bool,
    /// Settling delay in ms before re-arming capture.
    ///
    /// Restarting recognition immediately after it ends tends to pick up the
    /// tail of assistant playback; the delay lets the audio path quiesce.
    pub settle_delay_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            always_listen: false,
            settle_delay_ms: 350,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ClientError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ClientError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/colloquy/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("colloquy").join("config.toml")
        } else if let Some(config) = dirs::config_dir() {
            config.join("colloquy").join("config.toml")
        } else {
            PathBuf::from("/tmp/colloquy-config/config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(!config.backend.base_url.is_empty());
        assert!(!config.backend.model.is_empty());
        assert!(config.backend.request_timeout_secs > 0);
        assert!(config.voice.speak_responses);
        assert!(config.voice.voice.is_none());
        assert!(!config.capture.always_listen);
        assert!(config.capture.settle_delay_ms > 0);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = ClientConfig::default();
        config.backend.base_url = "http://10.0.0.5:9000".to_string();
        config.voice.voice = Some("coqui-tts:en_vctk".to_string());
        config.capture.always_listen = true;

        assert!(config.save_to_file(&path).is_ok());
        assert!(path.exists());

        let loaded = ClientConfig::from_file(&path).unwrap();
        assert_eq!(loaded.backend.base_url, "http://10.0.0.5:9000");
        assert_eq!(loaded.voice.voice.as_deref(), Some("coqui-tts:en_vctk"));
        assert!(loaded.capture.always_listen);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = ClientConfig::from_file(std::path::Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").ok();

        let result = ClientConfig::from_file(&path);
        assert!(result.is_err());
    }

    #[test]
    fn partial_file_uses_defaults_for_missing_sections() {
        let toml_str = r#"
[backend]
model = "llama3.2:3b"
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend.model, "llama3.2:3b");
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert!(config.voice.speak_responses);
        assert_eq!(config.capture.settle_delay_ms, 350);
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = ClientConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("colloquy"));
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = ClientConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("speak_responses"));
        assert!(toml_str.contains("settle_delay_ms"));
    }
}
