// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persisted OAuth tokens for the publishing platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OAuth token pair with its expiry.
///
/// `expires_at` already has the safety margin subtracted, so the access
/// token is usable without network while `now < expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Default for OAuthTokenState {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl OAuthTokenState {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && now < self.expires_at
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
