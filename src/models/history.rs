// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Generation history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote publication state of a generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadState {
    pub uploaded: bool,
    pub remote_url: Option<String>,
}

/// One generated image and the prompt that produced it.
///
/// `image_path` is unique across records; a prompt may own any number of
/// images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub prompt_id: i64,
    pub prompt_text: String,
    pub image_path: String,
    pub generated_at: DateTime<Utc>,
    pub llm_model: Option<String>,
    pub img_model: Option<String>,
    pub is_favorite: bool,
    pub upload: Option<UploadState>,
}

impl HistoryRecord {
    /// True once the image has been published successfully.
    pub fn is_uploaded(&self) -> bool {
        self.upload.as_ref().is_some_and(|u| u.uploaded)
    }
}
