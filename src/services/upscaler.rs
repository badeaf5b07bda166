// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Remote upscaling client (Stability AI fast upscaler).
//!
//! Handles:
//! - Fitting the input into the upscaler's pixel budget
//! - Multipart upload with explicit part names
//! - Content-moderation rejection via the `finish-reason` header
//!
//! There is no retry; the pipeline falls back to the original image on any
//! error from this client.

use crate::config::{UPSCALE_MAX_PIXELS, UPSCALE_TARGET_ASPECT};
use crate::error::{AppError, Result};
use crate::models::ImageFormat;
use crate::services::image_fit::fit_to_budget;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;

/// Response header carrying the moderation verdict.
pub const FINISH_REASON_HEADER: &str = "finish-reason";
pub const CONTENT_FILTERED: &str = "CONTENT_FILTERED";

/// Stability AI upscaling client.
#[derive(Clone)]
pub struct Upscaler {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_pixels: u64,
    target_aspect: f64,
}

impl Upscaler {
    /// Create a client. A missing key turns [`upscale`](Self::upscale) into
    /// a pass-through.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            max_pixels: UPSCALE_MAX_PIXELS,
            target_aspect: UPSCALE_TARGET_ASPECT,
        }
    }

    /// Override the pixel budget and target aspect ratio.
    pub fn with_budget(mut self, max_pixels: u64, target_aspect: f64) -> Self {
        self.max_pixels = max_pixels;
        self.target_aspect = target_aspect;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Upscale encoded image bytes.
    pub async fn upscale(&self, image: &[u8], cancel: &CancellationToken) -> Result<Vec<u8>> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::debug!("No upscaler key configured, skipping upscale");
            return Ok(image.to_vec());
        };

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let fitted = fit_to_budget(image, self.max_pixels, self.target_aspect)?;
        let format = ImageFormat::detect(&fitted).unwrap_or(ImageFormat::Png);

        let part = Part::bytes(fitted)
            .file_name(format!("image.{}", format.extension()))
            .mime_str(format.mime_type())
            .map_err(|e| AppError::from_reqwest("Building upscale request", e))?;
        let form = Form::new()
            .part("image", part)
            .text("output_format", "png");

        let url = format!("{}/upscale/fast", self.base_url);
        let request = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header(ACCEPT, "image/*")
            .multipart(form)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            r = request => r.map_err(|e| AppError::from_reqwest("Upscale request failed", e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Upscale request rejected");
            return Err(AppError::UpscaleRequestFailed { status, body });
        }

        let filtered = response
            .headers()
            .get(FINISH_REASON_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case(CONTENT_FILTERED));
        if filtered {
            tracing::warn!("Upscaled image was content filtered");
            return Err(AppError::ContentFiltered);
        }

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            b = response.bytes() => b.map_err(|e| AppError::from_reqwest("Reading upscale response", e))?,
        };

        tracing::info!(size = bytes.len(), "Image upscaled");
        Ok(bytes.to_vec())
    }
}
