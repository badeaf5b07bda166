// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dreamwall::config::DeviantArtConfig;
use dreamwall::db::{HistoryStore, MemorySettingsStore, SettingsStore, StoreError};
use dreamwall::error::{AppError, Result};
use dreamwall::models::{GenerationOptions, GenerationResult, HistoryRecord, OAuthTokenState};
use dreamwall::services::{DesktopBackground, OAuthTokenManager, Reauthorizer};
use dreamwall::time_utils::{Clock, ManualClock};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed starting instant for clock-driven tests.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn manual_clock() -> (ManualClock, Arc<dyn Clock>) {
    let clock = ManualClock::new(t0());
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    (clock, shared)
}

/// Solid-color PNG.
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 90, 160]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Solid-color JPEG.
#[allow(dead_code)]
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 30]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

/// DeviantArt registration pointing at a mock server.
#[allow(dead_code)]
pub fn test_deviantart(server_uri: &str) -> DeviantArtConfig {
    DeviantArtConfig {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        oauth_url: format!("{server_uri}/oauth2"),
        api_url: format!("{server_uri}/api/v1/oauth2"),
        redirect_uri: "http://localhost:5789/callback".to_string(),
    }
}

/// Tokens valid for another hour from [`t0`].
#[allow(dead_code)]
pub fn valid_tokens() -> OAuthTokenState {
    OAuthTokenState {
        access_token: Some("access-1".to_string()),
        refresh_token: Some("refresh-1".to_string()),
        expires_at: t0() + Duration::hours(1),
    }
}

/// Token manager over a memory store seeded with `tokens`.
#[allow(dead_code)]
pub fn token_manager(
    server_uri: &str,
    tokens: OAuthTokenState,
) -> (OAuthTokenManager, Arc<MemorySettingsStore>, ManualClock) {
    let store = Arc::new(MemorySettingsStore::with_tokens(tokens));
    let (clock, shared_clock) = manual_clock();
    let settings: Arc<dyn SettingsStore> = store.clone();
    let manager = OAuthTokenManager::new(
        reqwest::Client::new(),
        test_deviantart(server_uri),
        settings,
        shared_clock,
    );
    (manager, store, clock)
}

/// Generator returning canned bytes.
#[allow(dead_code)]
pub struct FakeGenerator {
    bytes: Vec<u8>,
    fail: bool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeGenerator {
    pub fn returning(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            bytes: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl dreamwall::services::ImageGenerator for FakeGenerator {
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<GenerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::Generation("provider unavailable".to_string()));
        }
        Ok(GenerationResult::from_bytes(self.bytes.clone()))
    }
}

/// Generator that never finishes.
#[allow(dead_code)]
pub struct PendingGenerator;

#[async_trait]
impl dreamwall::services::ImageGenerator for PendingGenerator {
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<GenerationResult> {
        std::future::pending().await
    }
}

/// Records every path it is asked to apply.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingWallpaper {
    pub applied: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl DesktopBackground for RecordingWallpaper {
    async fn apply(&self, image_path: &Path) -> Result<()> {
        self.applied.lock().unwrap().push(image_path.to_path_buf());
        Ok(())
    }
}

/// Returns a fixed code (or declines) and records the URLs it was shown.
#[allow(dead_code)]
pub struct RecordingReauthorizer {
    code: Option<String>,
    pub urls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingReauthorizer {
    pub fn with_code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn declining() -> Self {
        Self {
            code: None,
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Reauthorizer for RecordingReauthorizer {
    async fn authorize(&self, authorize_url: &str) -> Option<String> {
        self.urls.lock().unwrap().push(authorize_url.to_string());
        self.code.clone()
    }
}

/// History store whose every operation fails.
#[allow(dead_code)]
pub struct BrokenHistory;

impl BrokenHistory {
    fn err() -> StoreError {
        StoreError::Unavailable("disk full".to_string())
    }
}

impl HistoryStore for BrokenHistory {
    fn upsert_prompt(&self, _text: &str) -> std::result::Result<i64, StoreError> {
        Err(Self::err())
    }

    fn add_generated_image(
        &self,
        _prompt_id: i64,
        _image_path: &str,
        _llm_model: Option<&str>,
        _img_model: Option<&str>,
    ) -> std::result::Result<(), StoreError> {
        Err(Self::err())
    }

    fn set_upload_state(
        &self,
        _image_path: &str,
        _uploaded: bool,
        _remote_url: Option<&str>,
    ) -> std::result::Result<(), StoreError> {
        Err(Self::err())
    }

    fn get_history(&self) -> std::result::Result<Vec<HistoryRecord>, StoreError> {
        Err(Self::err())
    }

    fn find_image(&self, _image_path: &str) -> std::result::Result<Option<HistoryRecord>, StoreError> {
        Err(Self::err())
    }

    fn delete_prompt(&self, _prompt_id: i64) -> std::result::Result<bool, StoreError> {
        Err(Self::err())
    }

    fn delete_image(&self, _image_path: &str) -> std::result::Result<bool, StoreError> {
        Err(Self::err())
    }

    fn set_favorite(&self, _image_path: &str, _favorite: bool) -> std::result::Result<bool, StoreError> {
        Err(Self::err())
    }

    fn random_prompt(&self) -> std::result::Result<Option<String>, StoreError> {
        Err(Self::err())
    }
}

/// Values of the multipart text fields called `name`, in order.
#[allow(dead_code)]
pub fn form_fields(body: &[u8], name: &str) -> Vec<String> {
    let text = String::from_utf8_lossy(body);
    let marker = format!("name=\"{name}\"\r\n\r\n");
    text.match_indices(&marker)
        .map(|(at, _)| {
            let rest = &text[at + marker.len()..];
            rest[..rest.find("\r\n--").unwrap_or(rest.len())].to_string()
        })
        .collect()
}

/// Whether the multipart body carries a file part called `name`.
#[allow(dead_code)]
pub fn has_file_part(body: &[u8], name: &str) -> bool {
    String::from_utf8_lossy(body).contains(&format!("name=\"{name}\"; filename="))
}
