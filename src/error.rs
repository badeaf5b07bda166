// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types shared by the pipeline stages.

use reqwest::StatusCode;

/// Application error type.
///
/// Network and protocol failures from the upscaler and publisher are
/// returned as values so each call site can choose to degrade or escalate.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing credential, empty prompt, bad argument. Raised before any
    /// network call is made.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Transport-level failure (connect, timeout, unreadable body).
    #[error("Network error: {0}")]
    Network(String),

    /// The remote service rejected our credentials.
    #[error("Remote service requires authorization")]
    AuthorizationRequired,

    /// The upscaler refused the image on moderation grounds.
    #[error("Image was rejected by content moderation")]
    ContentFiltered,

    #[error("Upscale request failed with HTTP {status}: {body}")]
    UpscaleRequestFailed { status: StatusCode, body: String },

    /// Image generation provider failure.
    #[error("Image generation failed: {0}")]
    Generation(String),

    #[error("Image processing failed: {0}")]
    Image(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the error came from a cooperative cancellation rather than
    /// a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Whether the caller should re-authorize before retrying.
    pub fn is_authorization_error(&self) -> bool {
        matches!(self, AppError::AuthorizationRequired)
    }

    /// Map a transport error, keeping timeouts recognisable in logs.
    pub fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Network(format!("{context}: request timed out"))
        } else {
            AppError::Network(format!("{context}: {err}"))
        }
    }
}

impl From<crate::db::StoreError> for AppError {
    fn from(err: crate::db::StoreError) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<crate::services::image_fit::FitError> for AppError {
    fn from(err: crate::services::image_fit::FitError) -> Self {
        AppError::Image(err.to_string())
    }
}

/// Result type alias used across services.
pub type Result<T> = std::result::Result<T, AppError>;
