// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Desktop background integration.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;

/// Placeholder replaced by the image path in command templates.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Sets the desktop background to a saved image.
#[async_trait]
pub trait DesktopBackground: Send + Sync {
    async fn apply(&self, image_path: &Path) -> Result<()>;
}

/// Leaves the desktop alone.
pub struct NoopWallpaper;

#[async_trait]
impl DesktopBackground for NoopWallpaper {
    async fn apply(&self, image_path: &Path) -> Result<()> {
        tracing::debug!(path = %image_path.display(), "No wallpaper command configured");
        Ok(())
    }
}

/// Runs an external command, e.g.
/// `gsettings set org.gnome.desktop.background picture-uri file://{path}`.
#[derive(Debug, Clone)]
pub struct CommandWallpaper {
    program: String,
    args: Vec<String>,
}

impl CommandWallpaper {
    /// Parse a whitespace-separated command template.
    pub fn from_template(template: &str) -> Result<Self> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| AppError::Validation("Wallpaper command is empty".to_string()))?;
        let args: Vec<String> = parts.collect();
        if !args.iter().any(|a| a.contains(PATH_PLACEHOLDER)) {
            return Err(AppError::Validation(format!(
                "Wallpaper command must contain {PATH_PLACEHOLDER}"
            )));
        }
        Ok(Self { program, args })
    }

    /// Arguments with the placeholder substituted.
    pub fn args_for(&self, image_path: &Path) -> Vec<String> {
        let path = image_path.display().to_string();
        self.args
            .iter()
            .map(|a| a.replace(PATH_PLACEHOLDER, &path))
            .collect()
    }
}

#[async_trait]
impl DesktopBackground for CommandWallpaper {
    async fn apply(&self, image_path: &Path) -> Result<()> {
        let output = tokio::process::Command::new(&self.program)
            .args(self.args_for(image_path))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Internal(anyhow::anyhow!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!(path = %image_path.display(), "Desktop background updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_substitution() {
        let cmd = CommandWallpaper::from_template("feh --bg-fill {path}").unwrap();
        assert_eq!(
            cmd.args_for(Path::new("/tmp/a.png")),
            vec!["--bg-fill", "/tmp/a.png"]
        );

        let cmd = CommandWallpaper::from_template(
            "gsettings set org.gnome.desktop.background picture-uri file://{path}",
        )
        .unwrap();
        assert_eq!(
            cmd.args_for(Path::new("/x.png")).last().map(String::as_str),
            Some("file:///x.png")
        );
    }

    #[test]
    fn test_template_requires_placeholder() {
        assert!(CommandWallpaper::from_template("feh --bg-fill").is_err());
        assert!(CommandWallpaper::from_template("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_error() {
        let cmd = CommandWallpaper::from_template("false {path}").unwrap();
        assert!(cmd.apply(Path::new("/tmp/x.png")).await.is_err());

        let cmd = CommandWallpaper::from_template("true {path}").unwrap();
        assert!(cmd.apply(Path::new("/tmp/x.png")).await.is_ok());
    }
}
