//! Bearer credentials for the remote store.
//!
//! The engine never handles credentials; a [`TokenProvider`] is owned by the
//! remote store client and asked for a token before each request.

use std::fmt;

use thiserror::Error;

use crate::store::BoxFuture;

/// A bearer access token. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} chars>)", self.0.len())
    }
}

/// Credential acquisition or refresh failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential: {0}")]
    MissingCredentials(&'static str),

    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token endpoint rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("credentials rejected by the store: {0}")]
    Unauthorized(String),
}

/// Supplies a valid bearer token, refreshing it when needed.
pub trait TokenProvider: Send + Sync {
    /// Return a token that is valid for at least the next request.
    fn access_token(&self) -> BoxFuture<'_, Result<AccessToken, AuthError>>;
}

/// A fixed token, e.g. one minted by an external helper.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    /// Always hand out `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> BoxFuture<'_, Result<AccessToken, AuthError>> {
        Box::pin(async move {
            if self.token.secret().is_empty() {
                return Err(AuthError::MissingCredentials("access token"));
            }
            Ok(self.token.clone())
        })
    }
}

#[cfg(feature = "google-drive")]
pub use refresh::{GOOGLE_TOKEN_URI, OAuthClientConfig, RefreshTokenProvider};

#[cfg(feature = "google-drive")]
mod refresh {
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use serde::Deserialize;
    use tokio::sync::Mutex;

    use super::{AccessToken, AuthError, TokenProvider};
    use crate::store::BoxFuture;

    /// Google's OAuth2 token endpoint.
    pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

    /// Refresh a token this long before it actually expires.
    const EXPIRY_SKEW_SECS: i64 = 60;

    /// OAuth2 client credentials plus a long-lived refresh token.
    #[derive(Clone)]
    pub struct OAuthClientConfig {
        /// OAuth client id
        pub client_id: String,
        /// OAuth client secret
        pub client_secret: String,
        /// Long-lived refresh token
        pub refresh_token: String,
        /// Token endpoint (defaults to [`GOOGLE_TOKEN_URI`])
        pub token_uri: String,
    }

    impl OAuthClientConfig {
        fn missing(&self) -> Option<&'static str> {
            if self.client_id.is_empty() {
                Some("client id")
            } else if self.client_secret.is_empty() {
                Some("client secret")
            } else if self.refresh_token.is_empty() {
                Some("refresh token")
            } else {
                None
            }
        }
    }

    impl std::fmt::Debug for OAuthClientConfig {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("OAuthClientConfig")
                .field("client_id", &self.client_id)
                .field("client_secret_len", &self.client_secret.len())
                .field("refresh_token_len", &self.refresh_token.len())
                .field("token_uri", &self.token_uri)
                .finish()
        }
    }

    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
        #[serde(default)]
        expires_in: Option<i64>,
    }

    struct CachedToken {
        token: AccessToken,
        expires_at: DateTime<Utc>,
    }

    /// Exchanges a refresh token for access tokens and caches them until
    /// shortly before expiry.
    pub struct RefreshTokenProvider {
        client: reqwest::Client,
        config: OAuthClientConfig,
        cached: Mutex<Option<CachedToken>>,
    }

    impl RefreshTokenProvider {
        /// Create a provider; no request is made until a token is needed.
        pub fn new(config: OAuthClientConfig) -> Self {
            Self::with_client(reqwest::Client::new(), config)
        }

        /// Create a provider sharing an existing HTTP client.
        pub fn with_client(client: reqwest::Client, config: OAuthClientConfig) -> Self {
            Self {
                client,
                config,
                cached: Mutex::new(None),
            }
        }

        async fn refresh(&self) -> Result<CachedToken, AuthError> {
            if let Some(what) = self.config.missing() {
                return Err(AuthError::MissingCredentials(what));
            }
            log::info!(
                "[OAuth] Refreshing access token for client {} (refresh token length {})",
                self.config.client_id,
                self.config.refresh_token.len()
            );

            let response = self
                .client
                .post(&self.config.token_uri)
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                    ("refresh_token", self.config.refresh_token.as_str()),
                ])
                .send()
                .await
                .map_err(|e| AuthError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                log::error!("[OAuth] Token refresh rejected: {}", status);
                return Err(AuthError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }

            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| AuthError::Malformed(e.to_string()))?;
            if body.access_token.is_empty() {
                return Err(AuthError::Malformed("empty access_token".to_string()));
            }

            // Google issues one-hour tokens; assume that when the lifetime is omitted.
            let lifetime = ChronoDuration::seconds(body.expires_in.unwrap_or(3600));
            Ok(CachedToken {
                token: AccessToken::new(body.access_token),
                expires_at: Utc::now() + lifetime,
            })
        }
    }

    impl TokenProvider for RefreshTokenProvider {
        fn access_token(&self) -> BoxFuture<'_, Result<AccessToken, AuthError>> {
            Box::pin(async move {
                let mut cached = self.cached.lock().await;
                let fresh_until = Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS);
                if let Some(entry) = cached.as_ref()
                    && entry.expires_at > fresh_until
                {
                    return Ok(entry.token.clone());
                }

                let entry = self.refresh().await?;
                let token = entry.token.clone();
                *cached = Some(entry);
                Ok(token)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticTokenProvider::new("ya29.token");
        assert_eq!(provider.access_token().await.unwrap().secret(), "ya29.token");

        let empty = StaticTokenProvider::new("");
        assert_eq!(
            empty.access_token().await.unwrap_err(),
            AuthError::MissingCredentials("access token")
        );
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = AccessToken::new("ya29.secret");
        assert_eq!(format!("{:?}", token), "AccessToken(<11 chars>)");
    }

    #[cfg(feature = "google-drive")]
    #[tokio::test]
    async fn test_refresh_provider_requires_credentials() {
        let provider = RefreshTokenProvider::new(OAuthClientConfig {
            client_id: "client".to_string(),
            client_secret: String::new(),
            refresh_token: "refresh".to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
        });
        assert_eq!(
            provider.access_token().await.unwrap_err(),
            AuthError::MissingCredentials("client secret")
        );
    }
}
