use crate::defaults;
use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub generation: GenerationConfig,
    pub validator: ValidatorConfig,
    pub watermarks: WatermarkConfig,
    pub speech: SpeechConfig,
    pub stream: StreamConfig,
    pub playback: PlaybackConfig,
}

/// Text generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_attempts: u32,
}

/// Garbage classifier thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    pub min_length: usize,
    pub repeat_threshold: usize,
    pub min_repeated_line_chars: usize,
    /// Player names that count as story content for the context-aware check.
    pub player_names: Vec<String>,
}

/// Speculative job thresholds (accumulated characters)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatermarkConfig {
    pub image_prompt_chars: usize,
    pub ambience_chars: usize,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub voice: String,
    pub grace_period_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Multiplexed stream configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub ambience_wait_ms: u64,
}

/// Client-side playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sound_effect_cache: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_length: defaults::MIN_NARRATION_CHARS,
            repeat_threshold: defaults::REPEAT_THRESHOLD,
            min_repeated_line_chars: defaults::MIN_REPEATED_LINE_CHARS,
            player_names: Vec::new(),
        }
    }
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            image_prompt_chars: defaults::IMAGE_PROMPT_WATERMARK_CHARS,
            ambience_chars: defaults::AMBIENCE_WATERMARK_CHARS,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: defaults::DEFAULT_VOICE.to_string(),
            grace_period_ms: defaults::SPEECH_GRACE_PERIOD_MS,
            connect_timeout_ms: defaults::SPEECH_CONNECT_TIMEOUT_MS,
        }
    }
}

impl SpeechConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// After this long a pending connect counts as failed.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ambience_wait_ms: defaults::AMBIENCE_WAIT_MS,
        }
    }
}

impl StreamConfig {
    pub fn ambience_wait(&self) -> Duration {
        Duration::from_millis(self.ambience_wait_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sound_effect_cache: defaults::SOUND_EFFECT_CACHE_ENTRIES,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PulseError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PulseError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(PulseError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PULSECAST_VOICE → speech.voice
    /// - PULSECAST_MAX_ATTEMPTS → generation.max_attempts
    /// - PULSECAST_SPEECH → speech.enabled ("0", "off", "false" disable)
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(voice) = std::env::var("PULSECAST_VOICE")
            && !voice.is_empty()
        {
            self.speech.voice = voice;
        }

        if let Ok(attempts) = std::env::var("PULSECAST_MAX_ATTEMPTS")
            && !attempts.is_empty()
        {
            self.generation.max_attempts =
                attempts
                    .parse()
                    .map_err(|e| PulseError::ConfigInvalidValue {
                        key: "PULSECAST_MAX_ATTEMPTS".to_string(),
                        message: format!("{e}"),
                    })?;
        }

        if let Ok(speech) = std::env::var("PULSECAST_SPEECH")
            && !speech.is_empty()
        {
            self.speech.enabled = !matches!(
                speech.to_ascii_lowercase().as_str(),
                "0" | "off" | "false" | "no"
            );
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.generation.max_attempts == 0 {
            return Err(PulseError::ConfigInvalidValue {
                key: "generation.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.validator.repeat_threshold < 2 {
            return Err(PulseError::ConfigInvalidValue {
                key: "validator.repeat_threshold".to_string(),
                message: "must be at least 2".to_string(),
            });
        }
        if self.speech.voice.trim().is_empty() {
            return Err(PulseError::ConfigInvalidValue {
                key: "speech.voice".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/pulsecast/config.toml on Linux, or a relative
    /// `pulsecast.toml` when no config directory can be determined.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("pulsecast").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("pulsecast.toml"))
    }

    /// Render the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PulseError::ConfigParse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_pulsecast_env() {
        remove_env("PULSECAST_VOICE");
        remove_env("PULSECAST_MAX_ATTEMPTS");
        remove_env("PULSECAST_SPEECH");
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.validator.min_length, 50);
        assert_eq!(config.validator.repeat_threshold, 4);
        assert_eq!(config.validator.min_repeated_line_chars, 20);
        assert!(config.validator.player_names.is_empty());
        assert_eq!(config.watermarks.image_prompt_chars, 150);
        assert_eq!(config.watermarks.ambience_chars, 200);
        assert!(config.speech.enabled);
        assert_eq!(config.speech.voice, "narrator");
        assert_eq!(config.speech.grace_period(), Duration::from_millis(2500));
        assert_eq!(config.speech.connect_timeout(), Duration::from_millis(3000));
        assert_eq!(config.stream.ambience_wait(), Duration::from_millis(1500));
        assert_eq!(config.playback.sound_effect_cache, 32);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [generation]
            max_attempts = 5

            [validator]
            min_length = 80
            player_names = ["Mira", "Oskar"]

            [watermarks]
            image_prompt_chars = 120
            ambience_chars = 260

            [speech]
            enabled = false
            voice = "crone"
            grace_period_ms = 1000
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.generation.max_attempts, 5);
        assert_eq!(config.validator.min_length, 80);
        assert_eq!(config.validator.player_names, vec!["Mira", "Oskar"]);
        assert_eq!(config.watermarks.image_prompt_chars, 120);
        assert_eq!(config.watermarks.ambience_chars, 260);
        assert!(!config.speech.enabled);
        assert_eq!(config.speech.voice, "crone");
        assert_eq!(config.speech.grace_period_ms, 1000);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [watermarks]
            ambience_chars = 300
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.watermarks.ambience_chars, 300);
        assert_eq!(config.watermarks.image_prompt_chars, 150);
        assert_eq!(config.generation, GenerationConfig::default());
        assert_eq!(config.speech, SpeechConfig::default());
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let result = Config::load(Path::new("/nonexistent/pulsecast/config.toml"));
        assert!(matches!(
            result,
            Err(PulseError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/pulsecast.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_invalid_toml_errors() {
        let temp_file = write_config("[generation\nmax_attempts = ");
        let result = Config::load_or_default(temp_file.path());
        assert!(matches!(result, Err(PulseError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let temp_file = write_config("[generation]\nmax_attempts = 0\n");
        let result = Config::load(temp_file.path());
        match result {
            Err(PulseError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "generation.max_attempts");
            }
            other => panic!("expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_env_override_voice_and_attempts() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pulsecast_env();
        set_env("PULSECAST_VOICE", "bard");
        set_env("PULSECAST_MAX_ATTEMPTS", "7");

        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.speech.voice, "bard");
        assert_eq!(config.generation.max_attempts, 7);
        clear_pulsecast_env();
    }

    #[test]
    fn test_env_override_disables_speech() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pulsecast_env();
        set_env("PULSECAST_SPEECH", "off");

        let config = Config::default().with_env_overrides().unwrap();

        assert!(!config.speech.enabled);
        clear_pulsecast_env();
    }

    #[test]
    fn test_env_override_invalid_attempts_errors() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pulsecast_env();
        set_env("PULSECAST_MAX_ATTEMPTS", "many");

        let result = Config::default().with_env_overrides();

        assert!(matches!(
            result,
            Err(PulseError::ConfigInvalidValue { .. })
        ));
        clear_pulsecast_env();
    }

    #[test]
    fn test_empty_env_vars_are_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_pulsecast_env();
        set_env("PULSECAST_VOICE", "");

        let config = Config::default().with_env_overrides().unwrap();

        assert_eq!(config.speech.voice, "narrator");
        clear_pulsecast_env();
    }

    #[test]
    fn test_toml_roundtrip_preserves_values() {
        let mut config = Config::default();
        config.validator.player_names = vec!["Ash".to_string()];
        config.watermarks.ambience_chars = 222;

        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_path_ends_with_config_file() {
        let path = Config::default_path();
        assert!(path.to_string_lossy().ends_with("toml"));
    }
}
