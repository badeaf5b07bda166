// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - generation pipeline and its collaborators.

pub mod generator;
pub mod image_fit;
pub mod metadata;
pub mod oauth;
pub mod pipeline;
pub mod publisher;
pub mod scheduler;
pub mod upscaler;
pub mod wallpaper;

pub use generator::{ImageGenerator, OpenAiImageGenerator};
pub use oauth::{OAuthTokenManager, TokenStatus};
pub use pipeline::{Pipeline, PipelineSettings, PipelineStage, RunReport};
pub use publisher::{NoReauthorizer, PublishRequest, Publisher, Reauthorizer};
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerEvents};
pub use upscaler::Upscaler;
pub use wallpaper::{CommandWallpaper, DesktopBackground, NoopWallpaper};
