// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Generation history (SQLite).
//!
//! Provides typed operations for:
//! - Prompts (deduplicated by exact text, with usage counters)
//! - Generated images (one row per saved file, keyed by path)
//! - Upload state (remote URL once published)

use super::{tables, StoreError};
use crate::models::{HistoryRecord, UploadState};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Operations the pipeline needs from the history store.
pub trait HistoryStore: Send + Sync {
    /// Insert a new prompt or bump usage of an exact-text match. Returns its id.
    fn upsert_prompt(&self, text: &str) -> Result<i64, StoreError>;

    fn add_generated_image(
        &self,
        prompt_id: i64,
        image_path: &str,
        llm_model: Option<&str>,
        img_model: Option<&str>,
    ) -> Result<(), StoreError>;

    fn set_upload_state(
        &self,
        image_path: &str,
        uploaded: bool,
        remote_url: Option<&str>,
    ) -> Result<(), StoreError>;

    /// All images, newest first.
    fn get_history(&self) -> Result<Vec<HistoryRecord>, StoreError>;

    fn find_image(&self, image_path: &str) -> Result<Option<HistoryRecord>, StoreError>;

    /// Delete a prompt and every image recorded for it.
    fn delete_prompt(&self, prompt_id: i64) -> Result<bool, StoreError>;

    fn delete_image(&self, image_path: &str) -> Result<bool, StoreError>;

    fn set_favorite(&self, image_path: &str, favorite: bool) -> Result<bool, StoreError>;

    /// A uniformly chosen stored prompt, if any exist.
    fn random_prompt(&self) -> Result<Option<String>, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS prompts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    text          TEXT NOT NULL UNIQUE,
    usage_count   INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    last_used_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS generated_images (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    prompt_id     INTEGER NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
    image_path    TEXT NOT NULL UNIQUE,
    generated_at  TEXT NOT NULL,
    llm_model     TEXT,
    img_model     TEXT,
    is_favorite   INTEGER NOT NULL DEFAULT 0,
    uploaded      INTEGER,
    remote_url    TEXT
);
CREATE INDEX IF NOT EXISTS idx_generated_images_prompt ON generated_images(prompt_id);
";

const SELECT_RECORD: &str = "
SELECT gi.prompt_id, p.text, gi.image_path, gi.generated_at, gi.llm_model,
       gi.img_model, gi.is_favorite, gi.uploaded, gi.remote_url
FROM generated_images gi
JOIN prompts p ON p.id = gi.prompt_id";

/// SQLite-backed history store.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    /// Open (or create) the history database at `path`.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "History journal mode");
        tracing::info!(path = %path.display(), "Opened history database");
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn upsert_prompt(&self, text: &str) -> Result<i64, StoreError> {
        let now = format_utc_rfc3339(Utc::now());
        let id = self.conn().query_row(
            &format!(
                "INSERT INTO {} (text, usage_count, created_at, last_used_at)
                 VALUES (?1, 1, ?2, ?2)
                 ON CONFLICT(text) DO UPDATE SET
                     usage_count = usage_count + 1,
                     last_used_at = excluded.last_used_at
                 RETURNING id",
                tables::PROMPTS
            ),
            params![text, now],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn add_generated_image(
        &self,
        prompt_id: i64,
        image_path: &str,
        llm_model: Option<&str>,
        img_model: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            &format!(
                "INSERT INTO {} (prompt_id, image_path, generated_at, llm_model, img_model)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                tables::GENERATED_IMAGES
            ),
            params![
                prompt_id,
                image_path,
                format_utc_rfc3339(Utc::now()),
                llm_model,
                img_model
            ],
        )?;
        Ok(())
    }

    fn set_upload_state(
        &self,
        image_path: &str,
        uploaded: bool,
        remote_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            &format!(
                "UPDATE {} SET uploaded = ?2, remote_url = ?3 WHERE image_path = ?1",
                tables::GENERATED_IMAGES
            ),
            params![image_path, uploaded, remote_url],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(image_path.to_string()));
        }
        Ok(())
    }

    fn get_history(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RECORD} ORDER BY gi.generated_at DESC, gi.id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn find_image(&self, image_path: &str) -> Result<Option<HistoryRecord>, StoreError> {
        let record = self
            .conn()
            .query_row(
                &format!("{SELECT_RECORD} WHERE gi.image_path = ?1"),
                params![image_path],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_prompt(&self, prompt_id: i64) -> Result<bool, StoreError> {
        let affected = self.conn().execute(
            &format!("DELETE FROM {} WHERE id = ?1", tables::PROMPTS),
            params![prompt_id],
        )?;
        Ok(affected > 0)
    }

    fn delete_image(&self, image_path: &str) -> Result<bool, StoreError> {
        let affected = self.conn().execute(
            &format!(
                "DELETE FROM {} WHERE image_path = ?1",
                tables::GENERATED_IMAGES
            ),
            params![image_path],
        )?;
        Ok(affected > 0)
    }

    fn set_favorite(&self, image_path: &str, favorite: bool) -> Result<bool, StoreError> {
        let affected = self.conn().execute(
            &format!(
                "UPDATE {} SET is_favorite = ?2 WHERE image_path = ?1",
                tables::GENERATED_IMAGES
            ),
            params![image_path, favorite],
        )?;
        Ok(affected > 0)
    }

    fn random_prompt(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT text FROM {}", tables::PROMPTS))?;
        let texts = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(texts.choose(&mut rand::thread_rng()).cloned())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let generated_at: String = row.get(3)?;
    let generated_at = DateTime::parse_from_rfc3339(&generated_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);
    let uploaded: Option<bool> = row.get(7)?;
    let remote_url: Option<String> = row.get(8)?;

    Ok(HistoryRecord {
        prompt_id: row.get(0)?,
        prompt_text: row.get(1)?,
        image_path: row.get(2)?,
        generated_at,
        llm_model: row.get(4)?,
        img_model: row.get(5)?,
        is_favorite: row.get(6)?,
        upload: uploaded.map(|uploaded| UploadState {
            uploaded,
            remote_url,
        }),
    })
}
