//! Application configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is honoured for local use.
//! Optional credentials switch features off rather than failing startup:
//! no Stability key means no upscaling, no DeviantArt client means no
//! publishing.

use std::env;
use std::path::PathBuf;

/// Default Stability AI API root.
pub const DEFAULT_STABILITY_BASE_URL: &str = "https://api.stability.ai/v2beta/stable-image";
/// Default OpenAI-compatible API root.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_DEVIANTART_OAUTH_URL: &str = "https://www.deviantart.com/oauth2";
pub const DEFAULT_DEVIANTART_API_URL: &str = "https://www.deviantart.com/api/v1/oauth2";
/// Loopback redirect; the code is copied from the browser address bar.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:5789/callback";

/// Stability fast upscaler input limit.
pub const UPSCALE_MAX_PIXELS: u64 = 1_048_576;
pub const UPSCALE_TARGET_ASPECT: f64 = 16.0 / 9.0;

/// OAuth client registration for the publishing platform.
#[derive(Debug, Clone)]
pub struct DeviantArtConfig {
    pub client_id: String,
    pub client_secret: String,
    pub oauth_url: String,
    pub api_url: String,
    pub redirect_uri: String,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for settings.json and history.db
    pub data_dir: PathBuf,
    /// Where generated images are written
    pub output_dir: PathBuf,

    // --- Generation ---
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub image_model: String,
    pub image_size: String,
    /// Recorded in history next to the image model
    pub llm_model: Option<String>,

    // --- Upscaling ---
    pub stability_api_key: Option<String>,
    pub stability_base_url: String,
    pub upscale: bool,

    // --- Publishing ---
    pub deviantart: Option<DeviantArtConfig>,
    pub auto_publish: bool,
    pub publish_tags: Vec<String>,

    /// Command template with a `{path}` placeholder
    pub wallpaper_command: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        let data_dir = env::temp_dir().join("dreamwall-test");
        Self {
            output_dir: data_dir.join("images"),
            data_dir,
            openai_api_key: Some("test_openai_key".to_string()),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1792x1024".to_string(),
            llm_model: None,
            stability_api_key: None,
            stability_base_url: DEFAULT_STABILITY_BASE_URL.to_string(),
            upscale: true,
            deviantart: None,
            auto_publish: false,
            publish_tags: Vec::new(),
            wallpaper_command: None,
            http_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let data_dir = match env::var("DREAMWALL_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join("dreamwall"),
        };
        let output_dir = env::var("DREAMWALL_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("images"));

        let deviantart = match (
            non_empty("DEVIANTART_CLIENT_ID"),
            non_empty("DEVIANTART_CLIENT_SECRET"),
        ) {
            (Some(client_id), Some(client_secret)) => Some(DeviantArtConfig {
                client_id,
                client_secret,
                oauth_url: env::var("DEVIANTART_OAUTH_URL")
                    .unwrap_or_else(|_| DEFAULT_DEVIANTART_OAUTH_URL.to_string()),
                api_url: env::var("DEVIANTART_API_URL")
                    .unwrap_or_else(|_| DEFAULT_DEVIANTART_API_URL.to_string()),
                redirect_uri: env::var("DEVIANTART_REDIRECT_URI")
                    .unwrap_or_else(|_| DEFAULT_REDIRECT_URI.to_string()),
            }),
            (Some(_), None) => return Err(ConfigError::Missing("DEVIANTART_CLIENT_SECRET")),
            (None, Some(_)) => return Err(ConfigError::Missing("DEVIANTART_CLIENT_ID")),
            (None, None) => None,
        };

        Ok(Self {
            data_dir,
            output_dir,
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
            image_model: env::var("DREAMWALL_IMAGE_MODEL")
                .unwrap_or_else(|_| "dall-e-3".to_string()),
            image_size: env::var("DREAMWALL_IMAGE_SIZE")
                .unwrap_or_else(|_| "1792x1024".to_string()),
            llm_model: non_empty("DREAMWALL_LLM_MODEL"),
            stability_api_key: non_empty("STABILITY_API_KEY"),
            stability_base_url: env::var("STABILITY_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_STABILITY_BASE_URL.to_string()),
            upscale: parse_flag("DREAMWALL_UPSCALE", true)?,
            deviantart,
            auto_publish: parse_flag("DREAMWALL_AUTO_PUBLISH", false)?,
            publish_tags: env::var("DREAMWALL_PUBLISH_TAGS")
                .map(|v| parse_tags(&v))
                .unwrap_or_default(),
            wallpaper_command: non_empty("DREAMWALL_WALLPAPER_CMD"),
            http_timeout_secs: env::var("DREAMWALL_HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(key, v)),
        },
    }
}

/// Split a comma separated tag list, dropping blanks.
pub fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),

    #[error("Could not determine application data directory")]
    NoDataDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("DREAMWALL_DATA_DIR", "/tmp/dreamwall-config-test");
        env::set_var("OPENAI_API_KEY", "test_key");
        env::set_var("DREAMWALL_PUBLISH_TAGS", "landscape, ,surreal");
        env::remove_var("DEVIANTART_CLIENT_ID");
        env::remove_var("DEVIANTART_CLIENT_SECRET");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.openai_api_key.as_deref(), Some("test_key"));
        assert_eq!(
            config.output_dir,
            PathBuf::from("/tmp/dreamwall-config-test/images")
        );
        assert_eq!(config.publish_tags, vec!["landscape", "surreal"]);
        assert!(config.deviantart.is_none());
        assert_eq!(
            config.settings_path(),
            PathBuf::from("/tmp/dreamwall-config-test/settings.json")
        );
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("a,b , c,,"), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
    }
}
