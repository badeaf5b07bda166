// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Generation pipeline.
//!
//! Handles the core workflow:
//! 1. Generate an image from the prompt
//! 2. Upscale it (optional; falls back to the original on any error)
//! 3. Save it with the prompt embedded as provenance metadata
//! 4. Record prompt and image in the history store (best-effort)
//! 5. Set it as the desktop background
//! 6. Publish it (optional)
//!
//! Cancellation is checked at every await point. Side effects that already
//! happened (a saved file, a history row) are kept.

use crate::db::{HistoryStore, StoreError};
use crate::error::{AppError, Result};
use crate::models::{GenerationOptions, ImageFormat, UploadOutcome};
use crate::services::generator::ImageGenerator;
use crate::services::metadata::{embed_description, output_file_name};
use crate::services::publisher::{PublishRequest, Publisher, Reauthorizer};
use crate::services::upscaler::Upscaler;
use crate::services::wallpaper::DesktopBackground;
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Stage of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Generating,
    Upscaling,
    Saving,
    Indexing,
    Publishing,
    Cancelled,
    Failed,
}

/// Per-run behaviour switches.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub generation: GenerationOptions,
    /// Label stored in history next to the image model
    pub llm_model: Option<String>,
    pub upscale: bool,
    pub auto_publish: bool,
    pub publish_tags: Vec<String>,
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub prompt: String,
    pub image_path: PathBuf,
    pub format: ImageFormat,
    pub upscaled: bool,
    pub indexed: bool,
    pub wallpaper_applied: bool,
    pub publish: Option<UploadOutcome>,
    /// Non-fatal problems worth showing the user.
    pub notices: Vec<String>,
}

/// Runs one generation at a time.
pub struct Pipeline {
    generator: Arc<dyn ImageGenerator>,
    upscaler: Upscaler,
    history: Arc<dyn HistoryStore>,
    wallpaper: Arc<dyn DesktopBackground>,
    publisher: Option<Publisher>,
    settings: PipelineSettings,
    stage: PipelineStage,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        upscaler: Upscaler,
        history: Arc<dyn HistoryStore>,
        wallpaper: Arc<dyn DesktopBackground>,
        publisher: Option<Publisher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            generator,
            upscaler,
            history,
            wallpaper,
            publisher,
            settings,
            stage: PipelineStage::Idle,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn publisher_mut(&mut self) -> Option<&mut Publisher> {
        self.publisher.as_mut()
    }

    /// Run every stage for `prompt`.
    ///
    /// Returns [`AppError::Cancelled`] when `cancel` fires, distinct from a
    /// failure.
    pub async fn run(
        &mut self,
        prompt: &str,
        cancel: &CancellationToken,
        reauthorizer: &dyn Reauthorizer,
    ) -> Result<RunReport> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::Validation("Prompt is empty".to_string()));
        }

        tracing::info!(prompt, "Pipeline run started");
        let result = self.run_stages(prompt, cancel, reauthorizer).await;

        match &result {
            Ok(report) => {
                self.stage = PipelineStage::Idle;
                tracing::info!(
                    path = %report.image_path.display(),
                    upscaled = report.upscaled,
                    indexed = report.indexed,
                    "Pipeline run finished"
                );
            }
            Err(e) if e.is_cancelled() => {
                self.set_stage(PipelineStage::Cancelled);
            }
            Err(e) => {
                self.set_stage(PipelineStage::Failed);
                tracing::error!(error = %e, "Pipeline run failed");
            }
        }
        result
    }

    async fn run_stages(
        &mut self,
        prompt: &str,
        cancel: &CancellationToken,
        reauthorizer: &dyn Reauthorizer,
    ) -> Result<RunReport> {
        let mut notices = Vec::new();

        // 1. Generate
        self.set_stage(PipelineStage::Generating);
        let generated = cancellable(
            cancel,
            self.generator.generate(prompt, &self.settings.generation),
        )
        .await
        .map_err(|e| match e {
            AppError::Cancelled | AppError::Generation(_) => e,
            other => AppError::Generation(other.to_string()),
        })?;
        let mut image = generated.image_bytes;
        let mut format = generated.format;

        // 2. Upscale (optional)
        let mut upscaled = false;
        if self.settings.upscale && self.upscaler.is_configured() {
            self.set_stage(PipelineStage::Upscaling);
            match self.upscaler.upscale(&image, cancel).await {
                Ok(bytes) => {
                    format = ImageFormat::detect(&bytes).unwrap_or(format);
                    image = bytes;
                    upscaled = true;
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    tracing::warn!(error = %e, "Upscaling failed, keeping original image");
                    notices.push(format!("Upscaling skipped: {e}"));
                }
            }
        }
        check_cancelled(cancel)?;

        // 3. Save
        self.set_stage(PipelineStage::Saving);
        let tagged = match embed_description(&image, format, prompt) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to embed prompt metadata");
                notices.push(format!("Prompt metadata not embedded: {e}"));
                image
            }
        };
        let image_path = self.save(prompt, format, &tagged).await?;
        check_cancelled(cancel)?;

        // 4. Index (never fails the run)
        self.set_stage(PipelineStage::Indexing);
        let indexed = match self.index(prompt, &image_path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, path = %image_path.display(), "Failed to record image in history");
                notices.push(format!("History not updated: {e}"));
                false
            }
        };

        // 5. Desktop background, regardless of indexing
        let wallpaper_applied = match self.wallpaper.apply(&image_path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to set desktop background");
                notices.push(format!("Desktop background unchanged: {e}"));
                false
            }
        };

        // 6. Publish (optional)
        let mut publish = None;
        if self.settings.auto_publish && self.publisher.is_some() {
            check_cancelled(cancel)?;
            self.set_stage(PipelineStage::Publishing);
            let request = PublishRequest {
                image_bytes: tagged,
                format,
                file_name: file_name_of(&image_path),
                title: prompt.to_string(),
                description: prompt.to_string(),
                tags: self.settings.publish_tags.clone(),
            };
            let outcome = self.publish_request(&request, reauthorizer, cancel).await?;
            self.record_upload(&image_path, &outcome).await;
            publish = Some(outcome);
        }

        Ok(RunReport {
            prompt: prompt.to_string(),
            image_path,
            format,
            upscaled,
            indexed,
            wallpaper_applied,
            publish,
            notices,
        })
    }

    /// Publish an image that was saved earlier.
    ///
    /// Refuses images whose history record is already marked uploaded.
    pub async fn publish_existing(
        &mut self,
        image_path: &Path,
        reauthorizer: &dyn Reauthorizer,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        if self.publisher.is_none() {
            return Err(AppError::Validation(
                "Publishing is not configured".to_string(),
            ));
        }

        // History rows are keyed by canonical path
        let image_path = tokio::fs::canonicalize(image_path).await.map_err(|e| {
            AppError::Validation(format!("Cannot read {}: {e}", image_path.display()))
        })?;
        let image_path = image_path.as_path();
        let key = image_path.display().to_string();
        let lookup = key.clone();
        let record = match self
            .with_history(move |history| history.find_image(&lookup))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "History lookup failed, publishing anyway");
                None
            }
        };
        if let Some(record) = record.as_ref().filter(|r| r.is_uploaded()) {
            let url = record
                .upload
                .as_ref()
                .and_then(|u| u.remote_url.clone())
                .unwrap_or_default();
            return Err(AppError::Validation(format!(
                "Image was already published at {url}"
            )));
        }

        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| AppError::Validation(format!("Cannot read {key}: {e}")))?;
        let format = ImageFormat::detect(&bytes)
            .ok_or_else(|| AppError::Validation(format!("{key} is not a supported image")))?;
        let title = record
            .map(|r| r.prompt_text)
            .or_else(|| {
                image_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_default();

        let request = PublishRequest {
            image_bytes: bytes,
            format,
            file_name: file_name_of(image_path),
            title: title.clone(),
            description: title,
            tags: self.settings.publish_tags.clone(),
        };

        self.set_stage(PipelineStage::Publishing);
        let outcome = self.publish_request(&request, reauthorizer, cancel).await;
        self.stage = PipelineStage::Idle;
        let outcome = outcome?;
        self.record_upload(image_path, &outcome).await;
        Ok(outcome)
    }

    async fn publish_request(
        &mut self,
        request: &PublishRequest,
        reauthorizer: &dyn Reauthorizer,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let Some(publisher) = self.publisher.as_mut() else {
            return Err(AppError::Validation(
                "Publishing is not configured".to_string(),
            ));
        };
        let outcome = cancellable(cancel, async {
            Ok(publisher.publish(request, reauthorizer).await)
        })
        .await?;

        match &outcome {
            UploadOutcome::Success { .. } => {}
            UploadOutcome::AuthRequired => tracing::warn!("Publishing needs authorization"),
            UploadOutcome::Failure { message } => {
                tracing::error!(error = %message, "Publishing failed")
            }
        }
        Ok(outcome)
    }

    async fn record_upload(&self, image_path: &Path, outcome: &UploadOutcome) {
        let UploadOutcome::Success { remote_url } = outcome else {
            return;
        };
        let key = image_path.display().to_string();
        let (path, url) = (key.clone(), remote_url.clone());
        let result = self
            .with_history(move |history| history.set_upload_state(&path, true, Some(&url)))
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %key, "Failed to record upload state");
        }
    }

    async fn save(&self, prompt: &str, format: ImageFormat, bytes: &[u8]) -> Result<PathBuf> {
        let dir = &self.settings.output_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to create {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = unique_path(dir.join(output_file_name(prompt, Utc::now(), format)));
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to save {}: {}", path.display(), e))
        })?;

        let path = match tokio::fs::canonicalize(&path).await {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Failed to canonicalize saved path");
                path
            }
        };

        tracing::info!(path = %path.display(), size = bytes.len(), "Image saved");
        Ok(path)
    }

    async fn index(&self, prompt: &str, image_path: &Path) -> std::result::Result<(), StoreError> {
        let prompt = prompt.to_string();
        let key = image_path.display().to_string();
        let llm_model = self.settings.llm_model.clone();
        let img_model = self.settings.generation.model.clone();
        self.with_history(move |history| {
            let prompt_id = history.upsert_prompt(&prompt)?;
            history.add_generated_image(prompt_id, &key, llm_model.as_deref(), Some(&img_model))
        })
        .await
    }

    /// Run a history operation on the blocking pool.
    async fn with_history<T, F>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HistoryStore) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let history = Arc::clone(&self.history);
        tokio::task::spawn_blocking(move || op(history.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("History task failed: {e}")))?
    }

    fn set_stage(&mut self, stage: PipelineStage) {
        tracing::debug!(from = ?self.stage, to = ?stage, "Pipeline stage");
        self.stage = stage;
    }
}

/// Race `fut` against cancellation, preferring cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        r = fut => r,
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AppError::Cancelled)
    } else {
        Ok(())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

/// Append `_1`, `_2`, ... until the path is free.
fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    (1..)
        .map(|n| parent.join(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(path)
}
