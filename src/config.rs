//! Configuration loading.
//!
//! Settings live in `~/.linguist/config.toml`. Every field has a default, so a
//! missing file is fine; the API key usually comes from `GEMINI_API_KEY`.

use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Gemini Live WebSocket endpoint.
pub const GEMINI_LIVE_WS_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio dialog model used for tutoring sessions.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

const API_KEY_ENV: &str = "GEMINI_API_KEY";
const DATA_DIR_ENV: &str = "LINGUIST_DATA_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini API key. `GEMINI_API_KEY` takes precedence.
    pub api_key: Option<String>,
    /// Directory holding the snapshot database (default `~/.linguist`).
    pub data_dir: Option<PathBuf>,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    pub live: LiveConfig,
    pub tutor: TutorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            data_dir: None,
            log_filter: "linguist=info".to_string(),
            live: LiveConfig::default(),
            tutor: TutorPolicy::default(),
        }
    }
}

/// Remote session and audio framing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    /// Prebuilt voice the tutor speaks with.
    pub voice_name: String,
    /// Seconds to wait for `setupComplete` after opening the socket.
    pub setup_timeout_secs: u64,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Samples per captured frame.
    pub frame_samples: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: GEMINI_LIVE_WS_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice_name: "Puck".to_string(),
            setup_timeout_secs: 15,
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_samples: 4096,
        }
    }
}

/// Policy constants of the tutoring loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorPolicy {
    /// Assignment synthesized when a session of at least one minute ends
    /// without any homework on record.
    pub default_homework: String,
    /// Case-insensitive substrings that mark a user turn as a homework submission.
    pub submission_keywords: Vec<String>,
    /// Label stored for a user turn whose transcription came back empty.
    pub voice_placeholder: String,
}

impl Default for TutorPolicy {
    fn default() -> Self {
        Self {
            default_homework: "Review the vocabulary and phrases from today's conversation."
                .to_string(),
            submission_keywords: vec![
                "homework".to_string(),
                "作业".to_string(),
                "批改".to_string(),
                "submission".to_string(),
            ],
            voice_placeholder: "Voice interaction".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_home()?.join("config.toml"),
        };

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(dir.trim()));
            }
        }
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_home(),
        }
    }

    /// The configured API key, or an error naming the variable to set.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow::anyhow!("No Gemini API key configured. Set {API_KEY_ENV} or api_key in config.toml"))
    }
}

fn default_home() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".linguist"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_live_audio_format() {
        let config = Config::default();
        assert_eq!(config.live.input_sample_rate, 16_000);
        assert_eq!(config.live.output_sample_rate, 24_000);
        assert_eq!(config.live.frame_samples, 4096);
        assert_eq!(config.live.setup_timeout_secs, 15);
        assert!(config.live.endpoint.starts_with("wss://"));
    }

    #[test]
    fn default_policy_keywords() {
        let policy = TutorPolicy::default();
        assert!(policy.submission_keywords.iter().any(|k| k == "homework"));
        assert!(policy.submission_keywords.iter().any(|k| k == "作业"));
        assert_eq!(policy.voice_placeholder, "Voice interaction");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            log_filter = "linguist=debug"

            [live]
            voice_name = "Aoede"

            [tutor]
            default_homework = "Write three sentences."
            "#,
        )
        .unwrap();
        assert_eq!(config.log_filter, "linguist=debug");
        assert_eq!(config.live.voice_name, "Aoede");
        assert_eq!(config.live.model, DEFAULT_MODEL);
        assert_eq!(config.tutor.default_homework, "Write three sentences.");
        assert_eq!(config.tutor.submission_keywords.len(), 4);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.live.voice_name, "Puck");
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "live = [not valid").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn explicit_data_dir_wins() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/linguist-test")),
            ..Config::default()
        };
        assert_eq!(
            config.data_dir().unwrap(),
            PathBuf::from("/tmp/linguist-test")
        );
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let config = Config {
            api_key: Some(String::new()),
            ..Config::default()
        };
        assert!(config.require_api_key().is_err());
    }
}
