// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth2 token lifecycle for the publishing platform.
//!
//! Implements the authorization-code and refresh-token grants against
//! `POST {oauth_url}/token`. The redirect URI is a loopback address that
//! nothing listens on: the user copies the code out of the browser's
//! address bar.
//!
//! Token fields are only mutated inside [`OAuthTokenManager::ensure_valid_token`]
//! and [`OAuthTokenManager::exchange_code`], which take `&mut self`; one
//! publish attempt is in flight at a time.

use crate::config::DeviantArtConfig;
use crate::db::SettingsStore;
use crate::models::OAuthTokenState;
use crate::time_utils::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Subtracted from the reported lifetime so a token never expires mid-request.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Longest lifetime accepted from the provider (ten years).
const MAX_EXPIRES_IN_SECS: i64 = 10 * 365 * 24 * 3600;

/// Scopes needed to stage and publish.
const SCOPES: &str = "stash publish";

/// Lifecycle state of the held tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    NoToken,
    Valid,
    Expired,
    /// The last refresh was rejected and the tokens were discarded.
    RefreshFailed,
}

/// Token grant response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Holds and renews the access token.
pub struct OAuthTokenManager {
    http: reqwest::Client,
    config: DeviantArtConfig,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    tokens: OAuthTokenState,
    refresh_failed: bool,
}

impl OAuthTokenManager {
    /// Create a manager, loading persisted tokens.
    pub fn new(
        http: reqwest::Client,
        config: DeviantArtConfig,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tokens = settings.load_tokens().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load OAuth tokens");
            OAuthTokenState::default()
        });

        Self {
            http,
            config,
            settings,
            clock,
            tokens,
            refresh_failed: false,
        }
    }

    pub fn status(&self) -> TokenStatus {
        if self.tokens.is_usable(self.clock.now()) {
            TokenStatus::Valid
        } else if self.tokens.access_token.is_some() {
            TokenStatus::Expired
        } else if self.refresh_failed {
            TokenStatus::RefreshFailed
        } else {
            TokenStatus::NoToken
        }
    }

    /// Current access token, if one is held (valid or not).
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.access_token.as_deref()
    }

    pub fn tokens(&self) -> &OAuthTokenState {
        &self.tokens
    }

    /// Browser URL for the authorization-code flow.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}",
            self.config.oauth_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(SCOPES),
        )
    }

    /// Make sure a usable access token is held.
    ///
    /// Returns true without network when the token is still inside its
    /// validity window. An expired token with a refresh token is refreshed;
    /// a failed refresh discards both tokens. Returns false when the caller
    /// must run the authorization-code exchange.
    pub async fn ensure_valid_token(&mut self) -> bool {
        if self.tokens.is_usable(self.clock.now()) {
            return true;
        }

        let Some(refresh_token) = self.tokens.refresh_token.clone() else {
            tracing::debug!(status = ?self.status(), "No refresh token, authorization required");
            return false;
        };

        tracing::info!("Access token expired, refreshing");
        let result = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .await;

        match result {
            Ok(response) => {
                self.apply(response, Some(refresh_token));
                tracing::info!("Token refreshed");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, discarding tokens");
                self.tokens.clear();
                self.refresh_failed = true;
                self.persist();
                false
            }
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Any transport or parse failure leaves the held tokens untouched.
    pub async fn exchange_code(&mut self, code: &str) -> bool {
        let code = code.trim();
        if code.is_empty() {
            tracing::warn!("Empty authorization code");
            return false;
        }

        let result = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await;

        match result {
            Ok(response) => {
                self.apply(response, None);
                tracing::info!("Authorization code exchanged");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Authorization code exchange failed");
                false
            }
        }
    }

    /// Drop all tokens locally.
    pub fn sign_out(&mut self) {
        self.tokens.clear();
        self.refresh_failed = false;
        self.persist();
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<ValidatedToken, String> {
        let url = format!("{}/token", self.config.oauth_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("Token request failed: {e}"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(format!("HTTP {status}: {body}"));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse token response: {e}"))?;
        if parsed.status.as_deref() == Some("error") {
            return Err(parsed
                .error_description
                .unwrap_or_else(|| "provider reported an error".to_string()));
        }

        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "Token response has no access_token".to_string())?;

        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Ok(ValidatedToken {
            access_token,
            refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
            expires_at: self.expiry_from(expires_in)?,
        })
    }

    /// Absolute expiry for a lifetime of `expires_in` seconds, safety margin
    /// already subtracted.
    fn expiry_from(&self, expires_in: i64) -> Result<DateTime<Utc>, String> {
        if !(1..=MAX_EXPIRES_IN_SECS).contains(&expires_in) {
            return Err(format!("Token response has invalid expires_in: {expires_in}"));
        }
        Duration::try_seconds(expires_in - TOKEN_SAFETY_MARGIN_SECS)
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime))
            .ok_or_else(|| format!("Token expiry out of range: {expires_in}s"))
    }

    fn apply(&mut self, token: ValidatedToken, previous_refresh: Option<String>) {
        self.tokens = OAuthTokenState {
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token.or(previous_refresh),
            expires_at: token.expires_at,
        };
        self.refresh_failed = false;
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.settings.save_tokens(&self.tokens) {
            tracing::warn!(error = %e, "Failed to persist OAuth tokens");
        }
    }
}

struct ValidatedToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}
