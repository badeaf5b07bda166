// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Restart-safe recurring scheduler.
//!
//! The deadline lives in the settings store so a countdown survives process
//! restarts. The scheduler itself does not own a timer task: its owner
//! calls [`Scheduler::poll`] once per [`POLL_INTERVAL`] on a single task, so
//! every mutation of the schedule happens on that task. Notifications go out
//! over an unbounded channel.
//!
//! Other processes (the `schedule` subcommands) may rewrite the stored
//! schedule while a daemon is polling. Each poll reloads it, and any change
//! this scheduler did not write itself is adopted before the deadline is
//! checked.

use crate::db::SettingsStore;
use crate::error::{AppError, Result};
use crate::models::{PromptSource, ScheduleState};
use crate::time_utils::{format_next_generation, hours_to_duration, Clock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll cadence expected from the owner.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Notifications emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// The deadline passed. Emitted once per deadline.
    Fired,
    /// Countdown text; empty when no schedule is active.
    StatusChanged(String),
}

pub type SchedulerEvents = mpsc::UnboundedReceiver<SchedulerEvent>;

/// Recurring generation scheduler.
pub struct Scheduler {
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    state: ScheduleState,
    /// Store contents as last read or written by this scheduler.
    synced: Option<ScheduleState>,
    deadline: Option<DateTime<Utc>>,
    running: bool,
}

impl Scheduler {
    /// Create a stopped scheduler and the receiving end of its events.
    pub fn new(settings: Arc<dyn SettingsStore>, clock: Arc<dyn Clock>) -> (Self, SchedulerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state, synced) = match settings.load_schedule() {
            Ok(state) => (state.clone(), Some(state)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load schedule, using defaults");
                (ScheduleState::default(), None)
            }
        };

        let scheduler = Self {
            settings,
            clock,
            events: tx,
            state,
            synced,
            deadline: None,
            running: false,
        };
        (scheduler, rx)
    }

    /// Begin a countdown of `interval_hours` from now, replacing any
    /// existing one.
    pub fn start(&mut self, interval_hours: f64) -> Result<DateTime<Utc>> {
        self.start_with_source(interval_hours, self.state.source)
    }

    /// Like [`start`](Self::start) but also records where prompts come from.
    pub fn start_with_source(
        &mut self,
        interval_hours: f64,
        source: PromptSource,
    ) -> Result<DateTime<Utc>> {
        if !interval_hours.is_finite() || interval_hours <= 0.0 {
            return Err(AppError::Validation(format!(
                "Schedule interval must be a positive number of hours, got {interval_hours}"
            )));
        }

        let next = hours_to_duration(interval_hours)
            .and_then(|interval| self.clock.now().checked_add_signed(interval))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Schedule interval of {interval_hours} hours is too large"
                ))
            })?;

        self.stop();
        self.state.enabled = true;
        self.state.interval_hours = interval_hours;
        self.state.source = source;
        self.state.next_fire_at = Some(next);
        self.persist();

        self.deadline = Some(next);
        self.running = true;

        tracing::info!(
            interval_hours,
            next_fire_at = %next,
            ?source,
            "Schedule started"
        );
        Ok(next)
    }

    /// Resume a persisted countdown after a restart.
    ///
    /// Returns true when a future deadline was found and polling resumed.
    /// A missing or elapsed deadline is cleared and an empty status is sent.
    pub fn start_from_persisted(&mut self) -> bool {
        self.stop();

        match self.settings.load_schedule() {
            Ok(state) => {
                self.synced = Some(state.clone());
                self.state = state;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to reload schedule, using cached state"),
        }

        let now = self.clock.now();
        if let Some(deadline) = self.state.pending_deadline(now) {
            self.deadline = Some(deadline);
            self.running = true;
            tracing::info!(next_fire_at = %deadline, "Resumed persisted schedule");
            return true;
        }

        if self.state.next_fire_at.is_some() {
            tracing::info!("Persisted deadline has passed, clearing it");
            self.state.next_fire_at = None;
            self.persist();
        }
        self.emit(SchedulerEvent::StatusChanged(String::new()));
        false
    }

    /// Abandon the schedule: stop polling and clear the persisted deadline.
    pub fn cancel(&mut self) {
        self.stop();
        self.deadline = None;
        self.state.enabled = false;
        self.state.next_fire_at = None;
        self.persist();
        self.emit(SchedulerEvent::StatusChanged(String::new()));
        tracing::info!("Schedule cancelled");
    }

    /// Halt polling without touching the persisted deadline.
    pub fn stop(&mut self) {
        if self.running {
            tracing::debug!("Scheduler polling stopped");
        }
        self.running = false;
    }

    /// Adopt the stored schedule if another process changed it.
    ///
    /// A disabled schedule or a cleared deadline stops polling; a new
    /// deadline replaces the one being counted down to. Returns true when
    /// something was adopted.
    pub fn refresh(&mut self) -> bool {
        let stored = match self.settings.load_schedule() {
            Ok(stored) => stored,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to reload schedule, keeping cached state");
                return false;
            }
        };
        if self.synced.as_ref() == Some(&stored) {
            return false;
        }

        tracing::info!(
            enabled = stored.enabled,
            next_fire_at = ?stored.next_fire_at,
            "Schedule changed externally, adopting it"
        );
        self.synced = Some(stored.clone());
        self.state = stored;

        match self.state.next_fire_at.filter(|_| self.state.enabled) {
            Some(deadline) => {
                self.deadline = Some(deadline);
                self.running = true;
            }
            None => {
                let was_running = self.running;
                self.deadline = None;
                self.running = false;
                if was_running {
                    self.emit(SchedulerEvent::StatusChanged(String::new()));
                }
            }
        }
        true
    }

    /// One poll tick.
    pub fn poll(&mut self) {
        self.refresh();
        if !self.running {
            return;
        }

        let Some(deadline) = self.deadline else {
            self.running = false;
            return;
        };

        let now = self.clock.now();
        if now >= deadline {
            self.deadline = None;
            self.state.next_fire_at = None;
            self.persist();
            self.running = false;
            tracing::info!(deadline = %deadline, "Schedule deadline reached");
            self.emit(SchedulerEvent::Fired);
        } else {
            self.emit(SchedulerEvent::StatusChanged(format_next_generation(
                deadline, now,
            )));
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Deadline currently being counted down to.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.deadline.filter(|_| self.running)
    }

    /// Last known schedule configuration.
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    fn persist(&mut self) {
        match self.settings.save_schedule(&self.state) {
            Ok(()) => self.synced = Some(self.state.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist schedule, continuing in memory")
            }
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }
}
