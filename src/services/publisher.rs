// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-phase publishing to DeviantArt via Sta.sh.
//!
//! 1. Stage: `POST {api}/stash/submit` with the image and metadata, which
//!    returns an `itemid`.
//! 2. Publish: `POST {api}/stash/publish` referencing that `itemid`, which
//!    may return the permanent `url`.
//!
//! HTTP 401/403 at either phase is reported as
//! [`UploadOutcome::AuthRequired`]. [`Publisher::publish`] then asks the
//! supplied [`Reauthorizer`] for a fresh code and retries the whole flow
//! exactly once. There is no deduplication: callers check the history
//! record before publishing the same image again.

use crate::models::{ImageFormat, UploadOutcome};
use crate::services::oauth::OAuthTokenManager;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;

/// Tags every submission carries, ahead of user tags.
pub const MANDATORY_TAGS: &[&str] = &["aiart", "aigenerated"];

/// Platform limits.
const MAX_TITLE_CHARS: usize = 50;
const MAX_TAGS: usize = 30;

/// Web root used when the publish response carries no URL.
const STASH_WEB_URL: &str = "https://sta.sh";

/// Callback used to obtain a new authorization code from the user.
#[async_trait]
pub trait Reauthorizer: Send + Sync {
    /// Present `authorize_url` to the user and return the code they obtained,
    /// or `None` if they declined.
    async fn authorize(&self, authorize_url: &str) -> Option<String>;
}

/// Declines every authorization request (unattended runs).
pub struct NoReauthorizer;

#[async_trait]
impl Reauthorizer for NoReauthorizer {
    async fn authorize(&self, authorize_url: &str) -> Option<String> {
        tracing::warn!(url = %authorize_url, "Publishing needs authorization; run `dreamwall authorize`");
        None
    }
}

/// An image ready to publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub image_bytes: Vec<u8>,
    pub format: ImageFormat,
    pub file_name: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// DeviantArt stash publisher.
pub struct Publisher {
    http: reqwest::Client,
    api_url: String,
    tokens: OAuthTokenManager,
}

impl Publisher {
    pub fn new(http: reqwest::Client, api_url: impl Into<String>, tokens: OAuthTokenManager) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &OAuthTokenManager {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut OAuthTokenManager {
        &mut self.tokens
    }

    /// Stage and publish, re-authorizing and retrying once on an
    /// authorization failure.
    pub async fn publish(
        &mut self,
        request: &PublishRequest,
        reauthorizer: &dyn Reauthorizer,
    ) -> UploadOutcome {
        let outcome = self.publish_once(request).await;
        if !outcome.is_auth_required() {
            return outcome;
        }

        tracing::info!("Publishing requires authorization, asking user");
        let url = self.tokens.authorize_url();
        let Some(code) = reauthorizer.authorize(&url).await else {
            return UploadOutcome::AuthRequired;
        };
        if !self.tokens.exchange_code(&code).await {
            return UploadOutcome::Failure {
                message: "Authorization code exchange failed".to_string(),
            };
        }

        self.publish_once(request).await
    }

    /// A single stage-then-publish attempt.
    pub async fn publish_once(&mut self, request: &PublishRequest) -> UploadOutcome {
        if !self.tokens.ensure_valid_token().await {
            return UploadOutcome::AuthRequired;
        }
        let Some(access_token) = self.tokens.access_token().map(str::to_owned) else {
            return UploadOutcome::AuthRequired;
        };

        let item_id = match self.stage(&access_token, request).await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        tracing::info!(item_id, "Image staged");

        match self.publish_staged(&access_token, item_id).await {
            Ok(remote_url) => {
                tracing::info!(url = %remote_url, "Image published");
                UploadOutcome::Success { remote_url }
            }
            Err(outcome) => outcome,
        }
    }

    async fn stage(&self, access_token: &str, request: &PublishRequest) -> Result<u64, UploadOutcome> {
        let part = Part::bytes(request.image_bytes.clone())
            .file_name(request.file_name.clone())
            .mime_str(request.format.mime_type())
            .map_err(|e| failure(format!("Invalid image part: {e}")))?;

        let mut form = Form::new()
            .part("image", part)
            .text("access_token", access_token.to_string())
            .text("title", truncate_chars(&request.title, MAX_TITLE_CHARS))
            .text("artist_comments", request.description.clone())
            .text("is_ai_generated", "true")
            .text("noai", "false")
            .text("is_dirty", "false");
        for tag in build_tags(&request.tags) {
            form = form.text("tags[]", tag);
        }

        let json = self.post_form("stash/submit", form).await?;
        parse_item_id(&json).ok_or_else(|| failure(format!("Stage response has no itemid: {json}")))
    }

    async fn publish_staged(&self, access_token: &str, item_id: u64) -> Result<String, UploadOutcome> {
        let form = Form::new()
            .text("access_token", access_token.to_string())
            .text("itemid", item_id.to_string())
            .text("is_mature", "false")
            .text("agree_submission", "true")
            .text("agree_tos", "true")
            .text("is_ai_generated", "true")
            .text("noai", "false");

        let json = self.post_form("stash/publish", form).await?;
        Ok(json
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback_url(item_id)))
    }

    /// POST a multipart form and parse the JSON reply.
    async fn post_form(&self, path: &str, form: Form) -> Result<Value, UploadOutcome> {
        let url = format!("{}/{}", self.api_url, path);
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| failure(format!("Request to {path} failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(status = %status, body = %body, path, "Publishing authorization rejected");
            return Err(UploadOutcome::AuthRequired);
        }
        if !status.is_success() {
            tracing::error!(status = %status, body = %body, path, "Publishing request failed");
            return Err(failure(format!("HTTP {status}: {body}")));
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|_| failure(format!("Unparsable response from {path} (HTTP {status}): {body}")))?;
        if json.get("status").and_then(Value::as_str) == Some("error") {
            return Err(failure(format!("HTTP {status}: {body}")));
        }
        Ok(json)
    }
}

fn failure(message: String) -> UploadOutcome {
    UploadOutcome::Failure { message }
}

fn parse_item_id(json: &Value) -> Option<u64> {
    match json.get("itemid")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Mandatory tags first, then user tags; deduplicated case-insensitively.
pub fn build_tags(user_tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let candidates = MANDATORY_TAGS
        .iter()
        .map(|t| t.to_string())
        .chain(user_tags.iter().map(|t| sanitize_tag(t)));
    for tag in candidates {
        if tag.is_empty() || tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            continue;
        }
        tags.push(tag);
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

/// Tags are single words of letters, digits and underscores.
fn sanitize_tag(tag: &str) -> String {
    tag.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Sta.sh short link: `0` followed by the base-36 item id.
pub fn fallback_url(item_id: u64) -> String {
    format!("{STASH_WEB_URL}/0{}", to_base36(item_id))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
