use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// The OpenAI-compatible services scenario generation can run against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    OpenRouter,
}

impl Provider {
    pub fn api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

/// Credentials for minting LiveKit room tokens.
#[derive(Clone, Debug)]
pub struct LiveKitConfig {
    /// Where this service reaches the LiveKit server.
    pub url: String,
    /// The URL handed to clients; defaults to `url`.
    pub public_url: String,
    pub api_key: String,
    pub api_secret: SecretString,
    pub token_ttl: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub scenarios_path: PathBuf,
    pub provider: Provider,
    /// Key for the selected provider. Generation endpoints answer 503 without it.
    pub llm_api_key: Option<SecretString>,
    pub chat_model: String,
    pub followup_model: String,
    /// `None` when LiveKit is not configured; connection details answer 503.
    pub livekit: Option<LiveKitConfig>,
    pub log_level: Level,
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let scenarios_path = std::env::var("SCENARIOS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./scenarios"));

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "openrouter" => Provider::OpenRouter,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{}' is not one of openai, openrouter", other),
                ));
            }
        };
        let llm_api_key = non_empty_var(provider.key_var()).map(SecretString::from);

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let followup_model =
            std::env::var("FOLLOWUP_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let livekit = Self::livekit_from_env()?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            scenarios_path,
            provider,
            llm_api_key,
            chat_model,
            followup_model,
            livekit,
            log_level,
        })
    }

    /// LiveKit is optional, but a partial configuration is an error.
    fn livekit_from_env() -> Result<Option<LiveKitConfig>, ConfigError> {
        let url = non_empty_var("LIVEKIT_URL");
        let api_key = non_empty_var("LIVEKIT_API_KEY");
        let api_secret = non_empty_var("LIVEKIT_API_SECRET");

        let (url, api_key, api_secret) = match (url, api_key, api_secret) {
            (None, None, None) => return Ok(None),
            (Some(url), Some(key), Some(secret)) => (url, key, secret),
            (url, key, _) => {
                let missing = if url.is_none() {
                    "LIVEKIT_URL"
                } else if key.is_none() {
                    "LIVEKIT_API_KEY"
                } else {
                    "LIVEKIT_API_SECRET"
                };
                return Err(ConfigError::MissingVar(format!(
                    "{} must be set when LiveKit is configured",
                    missing
                )));
            }
        };

        let public_url = non_empty_var("LIVEKIT_PUBLIC_URL").unwrap_or_else(|| url.clone());
        let ttl_str =
            std::env::var("LIVEKIT_TOKEN_TTL_SECS").unwrap_or_else(|_| "900".to_string());
        let ttl_secs = ttl_str.parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue("LIVEKIT_TOKEN_TTL_SECS".to_string(), e.to_string())
        })?;

        Ok(Some(LiveKitConfig {
            url,
            public_url,
            api_key,
            api_secret: SecretString::from(api_secret),
            token_ttl: Duration::from_secs(ttl_secs),
        }))
    }
}
