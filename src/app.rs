// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Process-level controller.
//!
//! Owns the one scheduler and the one pipeline of this process. Manual runs
//! and scheduled runs both go through `&mut self`, so at most one pipeline
//! run is active at a time.

use crate::config::Config;
use crate::db::{HistoryStore, JsonSettingsStore, SettingsStore, SqliteHistoryStore};
use crate::error::{AppError, Result};
use crate::models::{GenerationOptions, PromptSource};
use crate::services::generator::{ImageGenerator, OpenAiImageGenerator};
use crate::services::oauth::OAuthTokenManager;
use crate::services::pipeline::{Pipeline, PipelineSettings, RunReport};
use crate::services::publisher::{Publisher, Reauthorizer};
use crate::services::scheduler::{Scheduler, SchedulerEvent, SchedulerEvents, POLL_INTERVAL};
use crate::services::upscaler::Upscaler;
use crate::services::wallpaper::{CommandWallpaper, DesktopBackground, NoopWallpaper};
use crate::time_utils::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Scheduler, pipeline and the stores they share.
pub struct App {
    pub settings: Arc<dyn SettingsStore>,
    pub history: Arc<dyn HistoryStore>,
    pub scheduler: Scheduler,
    pub pipeline: Pipeline,
    events: SchedulerEvents,
    last_status: String,
}

impl App {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
        scheduler: Scheduler,
        events: SchedulerEvents,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            settings,
            history,
            scheduler,
            pipeline,
            events,
            last_status: String::new(),
        }
    }

    /// Wire every service from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let settings: Arc<dyn SettingsStore> =
            Arc::new(JsonSettingsStore::new(config.settings_path()));
        let history: Arc<dyn HistoryStore> =
            Arc::new(SqliteHistoryStore::open_at(&config.history_path())?);

        let generator: Arc<dyn ImageGenerator> = match &config.openai_api_key {
            Some(key) => Arc::new(OpenAiImageGenerator::new(
                http.clone(),
                config.openai_base_url.clone(),
                key.clone(),
            )),
            None => Arc::new(MissingGenerator),
        };

        let upscaler = Upscaler::new(
            http.clone(),
            config.stability_base_url.clone(),
            config.stability_api_key.clone(),
        );

        let wallpaper: Arc<dyn DesktopBackground> = match &config.wallpaper_command {
            Some(template) => Arc::new(CommandWallpaper::from_template(template)?),
            None => Arc::new(NoopWallpaper),
        };

        let publisher = config.deviantart.as_ref().map(|da| {
            let tokens = OAuthTokenManager::new(
                http.clone(),
                da.clone(),
                Arc::clone(&settings),
                Arc::clone(&clock),
            );
            Publisher::new(http.clone(), da.api_url.clone(), tokens)
        });

        let pipeline = Pipeline::new(
            generator,
            upscaler,
            Arc::clone(&history),
            wallpaper,
            publisher,
            PipelineSettings {
                output_dir: config.output_dir.clone(),
                generation: GenerationOptions {
                    model: config.image_model.clone(),
                    size: config.image_size.clone(),
                    quality: None,
                },
                llm_model: config.llm_model.clone(),
                upscale: config.upscale,
                auto_publish: config.auto_publish,
                publish_tags: config.publish_tags.clone(),
            },
        );

        let (scheduler, events) = Scheduler::new(Arc::clone(&settings), clock);
        Ok(Self::new(settings, history, scheduler, events, pipeline))
    }

    /// Prompt for a run from the given source.
    pub fn resolve_prompt(&self, source: PromptSource) -> Result<String> {
        let current = self.settings.load_current_prompt().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load current prompt");
            None
        });

        let prompt = match source {
            PromptSource::CurrentPrompt => current,
            PromptSource::RandomPrompt => match self.history.random_prompt() {
                Ok(Some(prompt)) => Some(prompt),
                Ok(None) => current,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to pick a random prompt, using current");
                    current
                }
            },
        };

        prompt
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::Validation("No prompt configured".to_string()))
    }

    /// Run the pipeline now, preempting the countdown.
    ///
    /// The countdown is stopped rather than cancelled, and resumes afterwards
    /// if its persisted deadline is still ahead.
    pub async fn generate_now(
        &mut self,
        prompt: Option<&str>,
        cancel: &CancellationToken,
        reauthorizer: &dyn Reauthorizer,
    ) -> Result<RunReport> {
        let was_running = self.scheduler.is_running();
        self.scheduler.stop();

        let prompt = match prompt.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => {
                if let Err(e) = self.settings.save_current_prompt(p) {
                    tracing::warn!(error = %e, "Failed to remember current prompt");
                }
                p.to_string()
            }
            None => self.resolve_prompt(PromptSource::CurrentPrompt)?,
        };

        let result = self.pipeline.run(&prompt, cancel, reauthorizer).await;

        if was_running {
            self.scheduler.start_from_persisted();
        }
        result
    }

    /// Run triggered by a fired deadline; restarts the countdown while the
    /// schedule stays enabled.
    pub async fn run_scheduled(
        &mut self,
        cancel: &CancellationToken,
        reauthorizer: &dyn Reauthorizer,
    ) -> Result<RunReport> {
        let source = self.scheduler.state().source;
        let result = match self.resolve_prompt(source) {
            Ok(prompt) => self.pipeline.run(&prompt, cancel, reauthorizer).await,
            Err(e) => Err(e),
        };

        // The schedule may have been cancelled or restarted during the run.
        self.scheduler.refresh();
        let state = self.scheduler.state().clone();
        if state.enabled && !self.scheduler.is_running() && !cancel.is_cancelled() {
            if let Err(e) = self.scheduler.start(state.interval_hours) {
                tracing::error!(error = %e, "Failed to restart schedule");
            }
        }
        result
    }

    /// Poll the scheduler once per second and run the pipeline when it
    /// fires, until `shutdown` is cancelled.
    pub async fn run_daemon(
        &mut self,
        shutdown: CancellationToken,
        reauthorizer: &dyn Reauthorizer,
    ) -> Result<()> {
        if !self.scheduler.start_from_persisted() {
            let state = self.scheduler.state().clone();
            if state.enabled {
                tracing::info!(
                    interval_hours = state.interval_hours,
                    "No pending deadline, starting a new countdown"
                );
                self.scheduler.start(state.interval_hours)?;
            } else {
                tracing::info!("Schedule disabled; waiting for shutdown");
            }
        }

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.scheduler.poll(),
                Some(event) = self.events.recv() => {
                    self.handle_event(event, &shutdown, reauthorizer).await;
                }
            }
        }

        self.scheduler.stop();
        tracing::info!("Daemon stopped");
        Ok(())
    }

    /// Latest countdown text; empty when no schedule is active.
    pub fn status(&self) -> &str {
        &self.last_status
    }

    /// Drain pending scheduler events without blocking.
    pub fn take_events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn handle_event(
        &mut self,
        event: SchedulerEvent,
        shutdown: &CancellationToken,
        reauthorizer: &dyn Reauthorizer,
    ) {
        match event {
            SchedulerEvent::Fired => match self.run_scheduled(shutdown, reauthorizer).await {
                Ok(report) => {
                    for notice in &report.notices {
                        tracing::warn!(notice = %notice, "Scheduled run notice");
                    }
                }
                Err(e) if e.is_cancelled() => tracing::info!("Scheduled run cancelled"),
                Err(e) => tracing::error!(error = %e, "Scheduled run failed"),
            },
            SchedulerEvent::StatusChanged(status) => {
                if status != self.last_status {
                    tracing::trace!(status = %status, "Schedule status");
                }
                self.last_status = status;
            }
        }
    }
}

/// Stand-in when no generation key is configured.
struct MissingGenerator;

#[async_trait::async_trait]
impl ImageGenerator for MissingGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<crate::models::GenerationResult> {
        Err(AppError::Validation(
            "OPENAI_API_KEY is not configured".to_string(),
        ))
    }
}
