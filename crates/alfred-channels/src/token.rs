//! OAuth token caches for the Google Chat and Teams senders.
//!
//! Both follow the same lifecycle: a cached token is reused while it has
//! more than 60 seconds of validity left; otherwise one exchange runs under
//! the mutex and the result is stored with its expiry.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use alfred_core::config::{MAX_TOKEN_BODY_BYTES, TOKEN_EARLY_REFRESH_SECS};

use crate::error::{ChannelError, Result};

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Mutex-guarded access token cache.
pub struct TokenCache {
    inner: tokio::sync::Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(None),
        }
    }

    /// Return the cached token, or run `exchange` and cache its result.
    ///
    /// Consecutive calls within the validity window perform exactly one
    /// exchange — the mutex is held across the refresh so concurrent
    /// callers cannot race a second one.
    pub async fn get_access_token<F, Fut>(&self, exchange: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, i64)>>,
    {
        let mut guard = self.inner.lock().await;

        if let Some(cached) = guard.as_ref() {
            let deadline = cached.expires_at - Duration::seconds(TOKEN_EARLY_REFRESH_SECS);
            if !cached.token.is_empty() && Utc::now() < deadline {
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_in) = exchange().await?;
        let expires_at = Utc::now() + Duration::seconds(expires_in);
        debug!(expires_in, "access token refreshed");
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of both Google's and Microsoft's token endpoint responses.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

/// Read and decode a token endpoint response with the 64 KiB body cap.
pub async fn parse_token_response(resp: reqwest::Response) -> Result<TokenResponse> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if body.len() > MAX_TOKEN_BODY_BYTES {
        return Err(ChannelError::Auth(format!(
            "token response too large: {} bytes",
            body.len()
        )));
    }
    if !status.is_success() {
        return Err(ChannelError::Auth(format!(
            "token exchange failed: HTTP {status}"
        )));
    }
    serde_json::from_slice(&body)
        .map_err(|e| ChannelError::Auth(format!("malformed token response: {e}")))
}
