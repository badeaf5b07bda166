// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end tests for the generation pipeline with fake collaborators.

use dreamwall::db::{HistoryStore, SqliteHistoryStore};
use dreamwall::error::AppError;
use dreamwall::models::{GenerationOptions, ImageFormat, UploadOutcome};
use dreamwall::services::metadata::read_png_description;
use dreamwall::services::{
    ImageGenerator, NoReauthorizer, Pipeline, PipelineSettings, PipelineStage, Publisher,
    Upscaler,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{
    png_bytes, token_manager, valid_tokens, BrokenHistory, FakeGenerator, PendingGenerator,
    RecordingWallpaper,
};

const PROMPT: &str = "A lighthouse in a storm, oil painting";

fn settings(dir: &Path) -> PipelineSettings {
    PipelineSettings {
        output_dir: dir.join("out"),
        generation: GenerationOptions::default(),
        llm_model: Some("gpt-4o".to_string()),
        upscale: true,
        auto_publish: false,
        publish_tags: vec!["seascape".to_string()],
    }
}

fn no_upscaler() -> Upscaler {
    Upscaler::new(reqwest::Client::new(), "http://127.0.0.1:9", None)
}

struct Harness {
    pipeline: Pipeline,
    generator: Arc<FakeGenerator>,
    history: Arc<SqliteHistoryStore>,
    wallpaper: Arc<RecordingWallpaper>,
}

fn harness(dir: &Path, upscaler: Upscaler, publisher: Option<Publisher>) -> Harness {
    let generator = Arc::new(FakeGenerator::returning(png_bytes(32, 18)));
    let history = Arc::new(SqliteHistoryStore::open_in_memory().unwrap());
    let wallpaper = Arc::new(RecordingWallpaper::default());
    let mut settings = settings(dir);
    settings.auto_publish = publisher.is_some();

    let pipeline = Pipeline::new(
        generator.clone(),
        upscaler,
        history.clone(),
        wallpaper.clone(),
        publisher,
        settings,
    );
    Harness {
        pipeline,
        generator,
        history,
        wallpaper,
    }
}

fn canonical_key(path: &Path) -> String {
    std::fs::canonicalize(path).unwrap().display().to_string()
}

fn stash_publisher(server: &MockServer) -> Publisher {
    let (manager, _store, _clock) = token_manager(&server.uri(), valid_tokens());
    Publisher::new(
        reqwest::Client::new(),
        format!("{}/api/v1/oauth2", server.uri()),
        manager,
    )
}

#[tokio::test]
async fn test_run_saves_indexes_and_sets_wallpaper() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), None);

    let report = h
        .pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap();

    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.pipeline.stage(), PipelineStage::Idle);
    assert_eq!(report.format, ImageFormat::Png);
    assert!(!report.upscaled);
    assert!(report.indexed);
    assert!(report.wallpaper_applied);
    assert!(report.publish.is_none());
    assert!(report.notices.is_empty(), "{:?}", report.notices);

    // Saved with the prompt embedded
    let name = report.image_path.file_name().unwrap().to_string_lossy();
    assert!(name.ends_with("_A lighthouse in a storm, oil painting.png"), "{name}");
    let saved = std::fs::read(&report.image_path).unwrap();
    assert_eq!(read_png_description(&saved).as_deref(), Some(PROMPT));

    // Indexed
    let history = h.history.get_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].prompt_text, PROMPT);
    assert_eq!(history[0].image_path, report.image_path.display().to_string());
    assert_eq!(history[0].img_model.as_deref(), Some("dall-e-3"));
    assert_eq!(history[0].llm_model.as_deref(), Some("gpt-4o"));
    assert!(history[0].upload.is_none());

    assert_eq!(
        *h.wallpaper.applied.lock().unwrap(),
        vec![report.image_path.clone()]
    );
}

#[tokio::test]
async fn test_repeated_prompt_gets_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), None);
    let cancel = CancellationToken::new();

    let first = h.pipeline.run(PROMPT, &cancel, &NoReauthorizer).await.unwrap();
    let second = h.pipeline.run(PROMPT, &cancel, &NoReauthorizer).await.unwrap();

    assert_ne!(first.image_path, second.image_path);
    assert!(first.image_path.exists());
    assert!(second.image_path.exists());

    let history = h.history.get_history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].prompt_id, history[1].prompt_id);
}

#[tokio::test]
async fn test_upscaled_image_replaces_original() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upscale/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(64, 36)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let upscaler = Upscaler::new(reqwest::Client::new(), server.uri(), Some("sk".to_string()));
    let mut h = harness(dir.path(), upscaler, None);

    let report = h
        .pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap();

    assert!(report.upscaled);
    let saved = image::open(&report.image_path).unwrap();
    assert_eq!((saved.width(), saved.height()), (64, 36));
}

#[tokio::test]
async fn test_upscale_failure_keeps_original() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("busy"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let upscaler = Upscaler::new(reqwest::Client::new(), server.uri(), Some("sk".to_string()));
    let mut h = harness(dir.path(), upscaler, None);

    let report = h
        .pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap();

    assert!(!report.upscaled);
    assert_eq!(report.notices.len(), 1);
    assert!(report.notices[0].contains("busy"), "{:?}", report.notices);
    let saved = image::open(&report.image_path).unwrap();
    assert_eq!((saved.width(), saved.height()), (32, 18));
    assert!(report.indexed);
}

#[tokio::test]
async fn test_upscale_disabled_skips_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let upscaler = Upscaler::new(reqwest::Client::new(), server.uri(), Some("sk".to_string()));
    let generator: Arc<dyn ImageGenerator> = Arc::new(FakeGenerator::returning(png_bytes(8, 8)));
    let mut settings = settings(dir.path());
    settings.upscale = false;
    let mut pipeline = Pipeline::new(
        generator,
        upscaler,
        Arc::new(SqliteHistoryStore::open_in_memory().unwrap()),
        Arc::new(RecordingWallpaper::default()),
        None,
        settings,
    );

    let report = pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap();
    assert!(!report.upscaled);
}

#[tokio::test]
async fn test_cancellation_is_not_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let out_dir = settings.output_dir.clone();
    let mut pipeline = Pipeline::new(
        Arc::new(PendingGenerator),
        no_upscaler(),
        Arc::new(SqliteHistoryStore::open_in_memory().unwrap()),
        Arc::new(RecordingWallpaper::default()),
        None,
        settings,
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = pipeline.run(PROMPT, &cancel, &NoReauthorizer).await.unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(pipeline.stage(), PipelineStage::Cancelled);
    assert!(!out_dir.exists(), "nothing saved");
}

#[tokio::test]
async fn test_history_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let wallpaper = Arc::new(RecordingWallpaper::default());
    let mut pipeline = Pipeline::new(
        Arc::new(FakeGenerator::returning(png_bytes(16, 9))),
        no_upscaler(),
        Arc::new(BrokenHistory),
        wallpaper.clone(),
        None,
        settings(dir.path()),
    );

    let report = pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap();

    assert!(!report.indexed);
    assert!(report.image_path.exists());
    assert!(report.wallpaper_applied);
    assert_eq!(wallpaper.applied.lock().unwrap().len(), 1);
    assert!(report.notices.iter().any(|n| n.contains("disk full")));
}

#[tokio::test]
async fn test_empty_prompt_is_rejected_before_generation() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), None);

    let err = h
        .pipeline
        .run("   ", &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{err}");
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_generation_failure_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(
        Arc::new(FakeGenerator::failing()),
        no_upscaler(),
        Arc::new(SqliteHistoryStore::open_in_memory().unwrap()),
        Arc::new(RecordingWallpaper::default()),
        None,
        settings(dir.path()),
    );

    let err = pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Generation(_)), "{err}");
    assert_eq!(pipeline.stage(), PipelineStage::Failed);
}

#[tokio::test]
async fn test_auto_publish_records_remote_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/stash/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "itemid": 99 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/stash/publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://www.deviantart.com/me/art/Lighthouse-99"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), Some(stash_publisher(&server)));

    let report = h
        .pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap();

    assert_eq!(
        report.publish,
        Some(UploadOutcome::Success {
            remote_url: "https://www.deviantart.com/me/art/Lighthouse-99".to_string()
        })
    );
    let record = h
        .history
        .find_image(&report.image_path.display().to_string())
        .unwrap()
        .unwrap();
    assert!(record.is_uploaded());
    assert_eq!(
        record.upload.unwrap().remote_url.as_deref(),
        Some("https://www.deviantart.com/me/art/Lighthouse-99")
    );
}

#[tokio::test]
async fn test_publish_existing_refuses_uploaded_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), Some(stash_publisher(&server)));

    let image_path = dir.path().join("old.png");
    std::fs::write(&image_path, png_bytes(8, 8)).unwrap();
    let key = canonical_key(&image_path);
    let prompt_id = h.history.upsert_prompt(PROMPT).unwrap();
    h.history
        .add_generated_image(prompt_id, &key, None, Some("dall-e-3"))
        .unwrap();
    h.history
        .set_upload_state(&key, true, Some("https://sta.sh/0abc"))
        .unwrap();

    let err = h
        .pipeline
        .publish_existing(&image_path, &NoReauthorizer, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("https://sta.sh/0abc"), "{err}");
}

#[tokio::test]
async fn test_publish_existing_uploads_and_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/stash/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "itemid": 36 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/oauth2/stash/publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), Some(stash_publisher(&server)));

    let image_path = dir.path().join("old.png");
    std::fs::write(&image_path, png_bytes(8, 8)).unwrap();
    let key = canonical_key(&image_path);
    let prompt_id = h.history.upsert_prompt(PROMPT).unwrap();
    h.history
        .add_generated_image(prompt_id, &key, None, None)
        .unwrap();

    let outcome = h
        .pipeline
        .publish_existing(&image_path, &NoReauthorizer, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.remote_url(), Some("https://sta.sh/010"));

    let record = h.history.find_image(&key).unwrap().unwrap();
    assert!(record.is_uploaded());
}

#[tokio::test]
async fn test_publish_existing_requires_publisher() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), None);

    let err = h
        .pipeline
        .publish_existing(
            &dir.path().join("missing.png"),
            &NoReauthorizer,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_publish_existing_matches_differently_spelled_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), Some(stash_publisher(&server)));

    std::fs::create_dir_all(dir.path().join("out").join("sub")).unwrap();
    let image_path = dir.path().join("out").join("old.png");
    std::fs::write(&image_path, png_bytes(8, 8)).unwrap();
    let key = canonical_key(&image_path);
    let prompt_id = h.history.upsert_prompt(PROMPT).unwrap();
    h.history
        .add_generated_image(prompt_id, &key, None, None)
        .unwrap();
    h.history
        .set_upload_state(&key, true, Some("https://sta.sh/0abc"))
        .unwrap();

    // Same file reached through a detour
    let spelled = dir
        .path()
        .join("out")
        .join("sub")
        .join("..")
        .join("old.png");
    assert_ne!(spelled.display().to_string(), key);

    let err = h
        .pipeline
        .publish_existing(&spelled, &NoReauthorizer, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already published"), "{err}");
}

#[tokio::test]
async fn test_run_indexes_canonical_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), no_upscaler(), None);

    let report = h
        .pipeline
        .run(PROMPT, &CancellationToken::new(), &NoReauthorizer)
        .await
        .unwrap();

    assert!(report.image_path.is_absolute());
    assert_eq!(
        report.image_path.display().to_string(),
        canonical_key(&report.image_path)
    );
    assert!(h
        .history
        .find_image(&canonical_key(&report.image_path))
        .unwrap()
        .is_some());
}
