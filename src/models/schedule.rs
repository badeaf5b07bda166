// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persisted recurring schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a scheduled run takes its prompt from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptSource {
    #[default]
    CurrentPrompt,
    RandomPrompt,
}

/// Schedule configuration plus the active deadline.
///
/// `next_fire_at` is only set while a countdown is running. A disabled
/// schedule never carries a deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub enabled: bool,
    pub interval_hours: f64,
    pub next_fire_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: PromptSource,
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: 24.0,
            next_fire_at: None,
            source: PromptSource::CurrentPrompt,
        }
    }
}

impl ScheduleState {
    /// Deadline that is still ahead of `now`, if any.
    pub fn pending_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_fire_at.filter(|at| self.enabled && *at > now)
    }
}
