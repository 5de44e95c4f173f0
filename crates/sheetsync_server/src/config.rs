use std::env;
use std::path::PathBuf;
use std::time::Duration;

use sheetsync_core::auth::GOOGLE_TOKEN_URI;
use sheetsync_core::store::{DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE};
use sheetsync_core::{EngineConfig, RetryPolicy};

/// Which remote store backs the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Google Drive v3 (default)
    GoogleDrive,
    /// In-process store, empty at startup
    Memory,
}

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 5000)
    pub port: u16,
    /// Remote store backend (default: google-drive)
    pub store: StoreBackend,
    /// Google OAuth and Drive endpoint settings
    pub google: GoogleConfig,
    /// Retry policy and store timeouts
    pub engine: EngineConfig,
    /// TOML field map for form submissions (default: built-in map)
    pub field_map_path: Option<PathBuf>,
}

/// Google credentials and endpoints
#[derive(Clone)]
pub struct GoogleConfig {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Long-lived refresh token
    pub refresh_token: String,
    /// OAuth token endpoint
    pub token_uri: String,
    /// Drive metadata API base
    pub api_base: String,
    /// Drive upload API base
    pub upload_base: String,
}

impl std::fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret_len", &self.client_secret.len())
            .field("refresh_token_len", &self.refresh_token.len())
            .field("token_uri", &self.token_uri)
            .field("api_base", &self.api_base)
            .field("upload_base", &self.upload_base)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port = var("PORT", "5000")
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let store = match var("STORE", "google-drive").as_str() {
            "google-drive" | "drive" => StoreBackend::GoogleDrive,
            "memory" => StoreBackend::Memory,
            other => return Err(ConfigError::UnknownStore(other.to_string())),
        };

        let google = GoogleConfig {
            client_id: lookup("GOOGLE_CLIENT_ID").unwrap_or_default(),
            client_secret: lookup("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            refresh_token: lookup("GOOGLE_REFRESH_TOKEN").unwrap_or_default(),
            token_uri: var("GOOGLE_TOKEN_URI", GOOGLE_TOKEN_URI),
            api_base: var("DRIVE_API_BASE", DEFAULT_API_BASE),
            upload_base: var("DRIVE_UPLOAD_BASE", DEFAULT_UPLOAD_BASE),
        };

        if store == StoreBackend::GoogleDrive {
            for (name, value) in [
                ("GOOGLE_CLIENT_ID", &google.client_id),
                ("GOOGLE_CLIENT_SECRET", &google.client_secret),
                ("GOOGLE_REFRESH_TOKEN", &google.refresh_token),
            ] {
                if value.is_empty() {
                    return Err(ConfigError::MissingCredential(name));
                }
            }
        }

        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => match raw.trim().parse() {
                    Ok(n) => Ok(n),
                    Err(_) => Err(ConfigError::InvalidNumber { var: key, value: raw }),
                },
            }
        };

        let max_attempts = u32::try_from(number("UPDATE_MAX_ATTEMPTS", 5)?).map_err(|_| {
            ConfigError::InvalidNumber {
                var: "UPDATE_MAX_ATTEMPTS",
                value: var("UPDATE_MAX_ATTEMPTS", ""),
            }
        })?;
        let retry = RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_backoff(
                Duration::from_millis(number("UPDATE_INITIAL_BACKOFF_MS", 100)?),
                Duration::from_millis(number("UPDATE_MAX_BACKOFF_MS", 5000)?),
            );
        let engine = EngineConfig::default()
            .with_retry(retry)
            .with_fetch_timeout(Duration::from_secs(number("FETCH_TIMEOUT_SECS", 30)?))
            .with_commit_timeout(Duration::from_secs(number("COMMIT_TIMEOUT_SECS", 120)?));

        let field_map_path = lookup("FIELD_MAP_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Config {
            host,
            port,
            store,
            google,
            engine,
            field_map_path,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidNumber { var: &'static str, value: String },
    UnknownStore(String),
    MissingCredential(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "Invalid {} environment variable: '{}'", var, value)
            }
            ConfigError::UnknownStore(store) => {
                write!(f, "Unknown STORE '{}' (expected google-drive or memory)", store)
            }
            ConfigError::MissingCredential(var) => {
                write!(f, "{} must be set when STORE is google-drive", var)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
