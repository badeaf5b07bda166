// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dreamwall command line
//!
//! Generates wallpapers on demand or on a recurring schedule, and publishes
//! them to DeviantArt Sta.sh.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dreamwall::{
    config::Config,
    models::{PromptSource, UploadOutcome},
    services::{Reauthorizer, RunReport},
    time_utils::{format_next_generation, format_utc_rfc3339, Clock, SystemClock},
    App,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dreamwall: scheduled AI wallpaper generation.
#[derive(Parser)]
#[command(name = "dreamwall", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one image now.
    Generate {
        /// Prompt to use; defaults to the saved current prompt.
        prompt: Option<String>,
    },

    /// Manage the recurring schedule.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Poll the schedule and generate whenever it fires.
    Daemon,

    /// Authorize DeviantArt access.
    Authorize {
        /// Authorization code from the redirect; prints the URL when omitted.
        code: Option<String>,
    },

    /// Publish a previously generated image.
    Publish { path: PathBuf },

    /// List generated images, newest first.
    History,

    /// Manage the current prompt.
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Start a countdown, replacing any existing one.
    Start {
        /// Interval in hours; fractions are allowed.
        #[arg(long)]
        hours: f64,

        /// Pick prompts at random from history.
        #[arg(long)]
        random: bool,
    },

    /// Disable the schedule.
    Cancel,

    /// Show the schedule.
    Status,
}

#[derive(Subcommand)]
enum PromptAction {
    /// Set the current prompt.
    Set { text: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::debug!(data_dir = %config.data_dir.display(), "Configuration loaded");

    let mut app = App::from_config(&config)?;
    let shutdown = CancellationToken::new();
    spawn_ctrl_c(shutdown.clone());

    let reauthorizer = StdinReauthorizer;

    match cli.command {
        Command::Generate { prompt } => {
            let report = app
                .generate_now(prompt.as_deref(), &shutdown, &reauthorizer)
                .await?;
            print_report(&report);
        }
        Command::Schedule { action } => match action {
            ScheduleAction::Start { hours, random } => {
                let source = if random {
                    PromptSource::RandomPrompt
                } else {
                    PromptSource::CurrentPrompt
                };
                let next = app.scheduler.start_with_source(hours, source)?;
                println!("{}", format_next_generation(next, SystemClock.now()));
            }
            ScheduleAction::Cancel => {
                app.scheduler.cancel();
                println!("Schedule cancelled");
            }
            ScheduleAction::Status => {
                let state = app.scheduler.state();
                let now = SystemClock.now();
                match state.pending_deadline(now) {
                    Some(deadline) => println!("{}", format_next_generation(deadline, now)),
                    None if state.enabled => println!(
                        "Enabled every {}h, next countdown starts with the daemon",
                        state.interval_hours
                    ),
                    None => println!("No schedule"),
                }
            }
        },
        Command::Daemon => {
            tracing::info!("Starting scheduler daemon");
            app.run_daemon(shutdown, &reauthorizer).await?;
        }
        Command::Authorize { code } => {
            let publisher = app
                .pipeline
                .publisher_mut()
                .context("DeviantArt is not configured")?;
            let tokens = publisher.tokens_mut();
            match code {
                Some(code) => {
                    if tokens.exchange_code(&code).await {
                        println!("Authorized");
                    } else {
                        anyhow::bail!("Authorization code exchange failed");
                    }
                }
                None => println!("{}", tokens.authorize_url()),
            }
        }
        Command::Publish { path } => {
            let outcome = app
                .pipeline
                .publish_existing(&path, &reauthorizer, &shutdown)
                .await?;
            match outcome {
                UploadOutcome::Success { remote_url } => println!("Published: {remote_url}"),
                other => anyhow::bail!("Publish failed: {other}"),
            }
        }
        Command::History => {
            for record in app.history.get_history()? {
                let star = if record.is_favorite { "*" } else { " " };
                let remote = record
                    .upload
                    .as_ref()
                    .and_then(|u| u.remote_url.as_deref())
                    .unwrap_or("");
                println!(
                    "{star} {}  {}  {}  {remote}",
                    format_utc_rfc3339(record.generated_at),
                    record.image_path,
                    record.prompt_text
                );
            }
        }
        Command::Prompt { action } => match action {
            PromptAction::Set { text } => {
                app.settings.save_current_prompt(text.trim())?;
                println!("Current prompt saved");
            }
        },
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Saved {}", report.image_path.display());
    if let Some(outcome) = &report.publish {
        match outcome.remote_url() {
            Some(url) => println!("Published: {url}"),
            None => println!("Not published: {outcome}"),
        }
    }
    for notice in &report.notices {
        eprintln!("warning: {notice}");
    }
}

fn spawn_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down");
            shutdown.cancel();
        }
    });
}

/// Asks the user on the terminal to authorize and paste the code back.
struct StdinReauthorizer;

#[async_trait::async_trait]
impl Reauthorizer for StdinReauthorizer {
    async fn authorize(&self, authorize_url: &str) -> Option<String> {
        eprintln!("DeviantArt authorization required. Open this URL:\n\n  {authorize_url}\n");
        eprintln!("Paste the code from the redirect (empty to skip):");

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) => {
                let code = line.trim();
                (!code.is_empty()).then(|| code.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read authorization code");
                None
            }
        }
    }
}

/// Initialize logging: human-readable by default, JSON with `LOG_FORMAT=json`.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dreamwall=debug,info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
