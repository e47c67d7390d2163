//! Configuration loading and management

use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use threadline_domain::policy::ReplyPolicy;
use threadline_domain::{AssetKind, Viewer};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_state_db_path")]
    pub state_db_path: PathBuf,

    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default = "default_display_name")]
    pub display_name: String,

    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,

    #[serde(default = "default_max_mentions")]
    pub max_mentions: usize,

    #[serde(default = "default_max_asset_bytes")]
    pub max_asset_bytes: u64,

    #[serde(default = "default_allowed_kinds")]
    pub allowed_kinds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// File-hosting service; falls back to the backend URL when empty
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_db_path() -> PathBuf {
    PathBuf::from("./threadline.sqlite")
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_display_name() -> String {
    "Local User".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_token_env() -> String {
    "THREADLINE_TOKEN".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    30
}

fn default_max_body_chars() -> usize {
    10_000
}

fn default_max_mentions() -> usize {
    20
}

fn default_max_asset_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_kinds() -> Vec<String> {
    vec!["image".to_string(), "video".to_string()]
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            state_db_path: default_state_db_path(),
            user_id: default_user_id(),
            display_name: default_display_name(),
            is_admin: false,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_body_chars: default_max_body_chars(),
            max_mentions: default_max_mentions(),
            max_asset_bytes: default_max_asset_bytes(),
            allowed_kinds: default_allowed_kinds(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./threadline.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            // User specified a path that doesn't exist
            bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("THREADLINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// The acting user
    pub fn viewer(&self) -> Viewer {
        let viewer = Viewer::new(
            self.general.user_id.as_str(),
            self.general.display_name.as_str(),
        );
        if self.general.is_admin {
            viewer.admin()
        } else {
            viewer
        }
    }

    /// Validation policy with configured limits
    pub fn reply_policy(&self) -> Result<ReplyPolicy> {
        let allowed_kinds = self
            .policy
            .allowed_kinds
            .iter()
            .map(|kind| parse_asset_kind(kind))
            .collect::<Result<Vec<_>>>()?;

        Ok(ReplyPolicy {
            max_body_chars: self.policy.max_body_chars,
            max_mentions: self.policy.max_mentions,
            max_asset_bytes: self.policy.max_asset_bytes,
            allowed_kinds,
        })
    }

    /// Upload endpoint, defaulting to the backend
    pub fn upload_base_url(&self) -> &str {
        if self.upload.base_url.trim().is_empty() {
            &self.backend.base_url
        } else {
            &self.upload.base_url
        }
    }

    /// Read the backend token from the configured env var, if set
    pub fn load_token(&self) -> Option<SecretString> {
        if self.backend.token_env.is_empty() {
            return None;
        }
        std::env::var(&self.backend.token_env)
            .ok()
            .filter(|value| !value.is_empty())
            .map(SecretString::from)
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# threadline configuration

[general]
log_level = "info"
state_db_path = "./threadline.sqlite"
user_id = "local"
display_name = "Local User"
is_admin = false

[backend]
base_url = "http://127.0.0.1:8080/api"
# Name of the env var holding the bearer token
token_env = "THREADLINE_TOKEN"
poll_interval_secs = 5
timeout_secs = 30

[policy]
max_body_chars = 10000
max_mentions = 20
max_asset_bytes = 10485760
allowed_kinds = ["image", "video"]

[upload]
# Empty uses the backend base_url
base_url = ""
chunk_size = 65536
"#
        .to_string()
    }
}

fn parse_asset_kind(value: &str) -> Result<AssetKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "image" => Ok(AssetKind::Image),
        "video" => Ok(AssetKind::Video),
        other => bail!("Unknown media kind in policy.allowed_kinds: {}", other),
    }
}
