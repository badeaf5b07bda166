// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Dreamwall: scheduled AI wallpaper generation
//!
//! This crate generates an image from a text prompt, optionally upscales it,
//! saves it with the prompt embedded, indexes it in a local history, sets it
//! as the desktop background and can publish it to DeviantArt Sta.sh. A
//! restart-safe scheduler repeats the run every N hours.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod time_utils;

pub use app::App;
