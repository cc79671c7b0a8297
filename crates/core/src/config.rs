use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_TTS_VOICE: &str = "Kore";
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_LIVE_VOICE: &str = "Zephyr";
pub const DEFAULT_LIVE_PERSONA: &str = "You are Aijaz, a helpful and professional financial voice assistant. Keep answers concise. Use Indian Rupees for currency.";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings shared by the live voice session and the REST assistant client.
#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub gemini_api_key: String,
    pub api_base: String,
    pub text_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub live_model: String,
    pub live_voice: String,
    /// System instruction for the live session.
    pub live_persona: String,
    pub connect_timeout: Duration,
}

impl AssistantConfig {
    /// Defaults for everything but the key.
    pub fn new(gemini_api_key: impl Into<String>) -> Self {
        Self {
            gemini_api_key: gemini_api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice: DEFAULT_TTS_VOICE.to_string(),
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            live_voice: DEFAULT_LIVE_VOICE.to_string(),
            live_persona: DEFAULT_LIVE_PERSONA.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
        let mut config = Self::new(key);

        let var = |name: &str, slot: &mut String| {
            if let Ok(value) = std::env::var(name) {
                *slot = value;
            }
        };
        var("GEMINI_API_BASE", &mut config.api_base);
        var("TEXT_MODEL", &mut config.text_model);
        var("TTS_MODEL", &mut config.tts_model);
        var("TTS_VOICE", &mut config.tts_voice);
        var("LIVE_MODEL", &mut config.live_model);
        var("LIVE_VOICE", &mut config.live_voice);
        config.api_base = config.api_base.trim_end_matches('/').to_string();

        if let Ok(secs) = std::env::var("CONNECT_TIMEOUT_SECS") {
            let parsed = secs.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "CONNECT_TIMEOUT_SECS".to_string(),
                    format!("'{secs}' is not a positive number of seconds"),
                )
            })?;
            config.connect_timeout = Duration::from_secs(parsed);
        }

        Ok(config)
    }
}
