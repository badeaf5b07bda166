// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Result of a single publish attempt.

/// Outcome of one stage-then-publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success { remote_url: String },
    /// Credentials were rejected (HTTP 401/403) or no token is available.
    AuthRequired,
    /// Any other failure; carries HTTP status and raw body when available.
    Failure { message: String },
}

impl UploadOutcome {
    pub fn remote_url(&self) -> Option<&str> {
        match self {
            UploadOutcome::Success { remote_url } => Some(remote_url),
            _ => None,
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, UploadOutcome::AuthRequired)
    }
}

impl std::fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadOutcome::Success { remote_url } => write!(f, "published at {remote_url}"),
            UploadOutcome::AuthRequired => write!(f, "authorization required"),
            UploadOutcome::Failure { message } => write!(f, "publish failed: {message}"),
        }
    }
}
