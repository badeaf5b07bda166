// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Image generation provider.

use crate::error::{AppError, Result};
use crate::models::{GenerationOptions, GenerationResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;

/// Opaque "generate an image from a prompt" operation.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult>;
}

/// OpenAI-compatible `images/generations` client.
#[derive(Clone)]
pub struct OpenAiImageGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

impl OpenAiImageGenerator {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::from_reqwest("Image download failed", e))?;
        if !response.status().is_success() {
            return Err(AppError::Generation(format!(
                "Image download failed with HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::from_reqwest("Reading image download", e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<GenerationResult> {
        let url = format!("{}/v1/images/generations", self.base_url);

        let mut body = serde_json::json!({
            "model": options.model,
            "prompt": prompt,
            "size": options.size,
            "n": 1,
            "response_format": "b64_json",
        });
        if let Some(quality) = &options.quality {
            body["quality"] = serde_json::Value::String(quality.clone());
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::from_reqwest("Image generation request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Image generation rejected");
            return Err(AppError::Generation(format!("HTTP {status}: {body}")));
        }

        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| AppError::Generation(format!("JSON parse error: {e}")))?;
        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Generation("Response contained no images".to_string()))?;

        if let Some(revised) = &datum.revised_prompt {
            tracing::debug!(revised_prompt = %revised, "Provider revised the prompt");
        }

        let bytes = match (datum.b64_json, datum.url) {
            (Some(b64), _) => BASE64
                .decode(b64.as_bytes())
                .map_err(|e| AppError::Generation(format!("Invalid base64 image: {e}")))?,
            (None, Some(url)) => self.download(&url).await?,
            (None, None) => {
                return Err(AppError::Generation(
                    "Response image has neither data nor URL".to_string(),
                ))
            }
        };

        Ok(GenerationResult::from_bytes(bytes))
    }
}
