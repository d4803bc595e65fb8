use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_url: String,
    pub provider: String,
    pub model: String,
    pub enhanced_mode: bool,
    pub answer_length: String,
    pub quote_count: u32,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let server_url = std::env::var("WORKSHOP_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string());

        let provider = std::env::var("ANSWER_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let model = std::env::var("ANSWER_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let enhanced_mode_str =
            std::env::var("ENHANCED_MODE").unwrap_or_else(|_| "false".to_string());
        let enhanced_mode = match enhanced_mode_str.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "ENHANCED_MODE".to_string(),
                    format!("'{}' is not a boolean", other),
                ));
            }
        };

        let answer_length =
            std::env::var("ANSWER_LENGTH").unwrap_or_else(|_| "medium".to_string());
        if !matches!(answer_length.as_str(), "short" | "medium" | "long") {
            return Err(ConfigError::InvalidValue(
                "ANSWER_LENGTH".to_string(),
                format!("'{}' is not one of short/medium/long", answer_length),
            ));
        }

        let quote_count_str = std::env::var("QUOTE_COUNT").unwrap_or_else(|_| "3".to_string());
        let quote_count = quote_count_str.parse::<u32>().map_err(|_| {
            ConfigError::InvalidValue(
                "QUOTE_COUNT".to_string(),
                format!("'{}' is not a count", quote_count_str),
            )
        })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            server_url,
            provider,
            model,
            enhanced_mode,
            answer_length,
            quote_count,
            log_level,
        })
    }
}
