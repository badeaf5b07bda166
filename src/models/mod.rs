// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod generation;
pub mod history;
pub mod schedule;
pub mod token;
pub mod upload;

pub use generation::{GenerationOptions, GenerationResult, ImageFormat};
pub use history::{HistoryRecord, UploadState};
pub use schedule::{PromptSource, ScheduleState};
pub use token::OAuthTokenState;
pub use upload::UploadOutcome;
