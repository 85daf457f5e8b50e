use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_RESOLVE_DELAY_MS: u64 = 2500;
const DEFAULT_IDENTITY_DB: &str = "identities.sqlite";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a whole number of milliseconds, got {value:?}")]
    InvalidDuration { name: &'static str, value: String },
}

/// Which shared store rooms live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSetting {
    /// In-process store shared by every chat of this bot.
    Memory,
    /// Anything else: rooms are unavailable.
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreSetting,
    pub catalog_path: Option<PathBuf>,
    /// How long both players see the outcome before the next question.
    pub resolve_delay: Duration,
    pub identity_db: String,
    pub chatgpt_api_key: Option<String>,
}

impl Config {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let store = match present("ROOM_STORE") {
            None => StoreSetting::Memory,
            Some(value) if value.trim().eq_ignore_ascii_case("memory") => StoreSetting::Memory,
            Some(value) => StoreSetting::Unsupported(value),
        };

        let resolve_delay = match present("RESOLVE_DELAY_MS") {
            None => Duration::from_millis(DEFAULT_RESOLVE_DELAY_MS),
            Some(value) => value
                .trim()
                .parse()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidDuration {
                    name: "RESOLVE_DELAY_MS",
                    value,
                })?,
        };

        Ok(Self {
            store,
            catalog_path: present("QUIZ_CATALOG").map(PathBuf::from),
            resolve_delay,
            identity_db: present("IDENTITY_DB").unwrap_or_else(|| DEFAULT_IDENTITY_DB.to_string()),
            chatgpt_api_key: present("CHATGPT_API_KEY"),
        })
    }
}
