use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;
use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no credentials configured: {0}")]
    Missing(String),
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Supplies bearer tokens for Google APIs.
///
/// Callers treat the token as opaque; how it is obtained or refreshed is up
/// to the implementation.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<String, AuthError>;

    /// Forget a token the server rejected so the next call obtains a new one.
    fn invalidate(&self) {}
}

/// A pre-issued access token used as-is.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 refresh-token grant with an in-memory cache of the access token.
pub struct RefreshToken {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: Mutex<Option<(String, Instant)>>,
}

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

impl RefreshToken {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            cached: Mutex::new(None),
        }
    }

    fn fetch(&self) -> Result<(String, Instant), AuthError> {
        debug!("refreshing access token via {}", self.token_url);
        let resp = self
            .http
            .post(&self.token_url)
            .timeout(config::API_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp.json()?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN);
        Ok((token.access_token, expires_at))
    }
}

impl TokenSource for RefreshToken {
    fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        let (token, expires_at) = self.fetch()?;
        *cached = Some((token.clone(), expires_at));
        Ok(token)
    }

    fn invalidate(&self) {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cached = None;
    }
}
