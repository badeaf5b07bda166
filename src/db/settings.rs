// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local settings persistence.
//!
//! Holds the schedule deadline, the OAuth tokens and the current prompt.
//! Writes are best-effort from the caller's point of view: every consumer
//! logs and discards a failed save.

use super::StoreError;
use crate::models::{OAuthTokenState, ScheduleState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Durable key-value access to the settings the pipeline needs.
pub trait SettingsStore: Send + Sync {
    fn load_schedule(&self) -> Result<ScheduleState, StoreError>;
    fn save_schedule(&self, state: &ScheduleState) -> Result<(), StoreError>;

    fn load_tokens(&self) -> Result<OAuthTokenState, StoreError>;
    fn save_tokens(&self, tokens: &OAuthTokenState) -> Result<(), StoreError>;

    fn load_current_prompt(&self) -> Result<Option<String>, StoreError>;
    fn save_current_prompt(&self, prompt: &str) -> Result<(), StoreError>;
}

/// On-disk document layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsDocument {
    #[serde(default)]
    schedule: ScheduleState,
    #[serde(default)]
    oauth: OAuthTokenState,
    #[serde(default)]
    current_prompt: Option<String>,
}

/// Settings stored as a single JSON file.
pub struct JsonSettingsStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SettingsDocument, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) if data.trim().is_empty() => Ok(SettingsDocument::default()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, doc: &SettingsDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut SettingsDocument)) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.read()?;
        f(&mut doc);
        self.write(&doc)
    }

    fn snapshot(&self) -> Result<SettingsDocument, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read()
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load_schedule(&self) -> Result<ScheduleState, StoreError> {
        Ok(self.snapshot()?.schedule)
    }

    fn save_schedule(&self, state: &ScheduleState) -> Result<(), StoreError> {
        self.update(|doc| doc.schedule = state.clone())
    }

    fn load_tokens(&self) -> Result<OAuthTokenState, StoreError> {
        Ok(self.snapshot()?.oauth)
    }

    fn save_tokens(&self, tokens: &OAuthTokenState) -> Result<(), StoreError> {
        self.update(|doc| doc.oauth = tokens.clone())
    }

    fn load_current_prompt(&self) -> Result<Option<String>, StoreError> {
        Ok(self.snapshot()?.current_prompt)
    }

    fn save_current_prompt(&self, prompt: &str) -> Result<(), StoreError> {
        self.update(|doc| doc.current_prompt = Some(prompt.to_string()))
    }
}

/// In-memory settings with optional write-failure injection.
#[derive(Default)]
pub struct MemorySettingsStore {
    doc: Mutex<SettingsDocument>,
    fail_writes: AtomicBool,
    schedule_writes: AtomicUsize,
    token_writes: AtomicUsize,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with a persisted schedule.
    pub fn with_schedule(state: ScheduleState) -> Self {
        let store = Self::default();
        store.lock().schedule = state;
        store
    }

    /// Seed with persisted tokens.
    pub fn with_tokens(tokens: OAuthTokenState) -> Self {
        let store = Self::default();
        store.lock().oauth = tokens;
        store
    }

    /// Make every subsequent save fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn schedule_writes(&self) -> usize {
        self.schedule_writes.load(Ordering::SeqCst)
    }

    pub fn token_writes(&self) -> usize {
        self.token_writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SettingsDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write failure injected".to_string()));
        }
        Ok(())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load_schedule(&self) -> Result<ScheduleState, StoreError> {
        Ok(self.lock().schedule.clone())
    }

    fn save_schedule(&self, state: &ScheduleState) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().schedule = state.clone();
        self.schedule_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_tokens(&self) -> Result<OAuthTokenState, StoreError> {
        Ok(self.lock().oauth.clone())
    }

    fn save_tokens(&self, tokens: &OAuthTokenState) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().oauth = tokens.clone();
        self.token_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_current_prompt(&self) -> Result<Option<String>, StoreError> {
        Ok(self.lock().current_prompt.clone())
    }

    fn save_current_prompt(&self, prompt: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().current_prompt = Some(prompt.to_string());
        Ok(())
    }
}
