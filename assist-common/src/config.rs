use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::client::ReconnectPolicy;
use crate::error::SessionError;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_NICKNAME: &str = "operator";

/// Console configuration, read from a TOML file. Every field has a default so
/// an empty or missing file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub token: Option<String>,
    pub nickname: Option<String>,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            token: None,
            nickname: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(self.base_delay_ms), self.max_attempts)
    }
}

impl ClientConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`ClientConfig::load`], but a missing file yields the defaults.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if tokio::fs::try_exists(path.as_ref()).await? {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }
}

/// Bearer token plus the display name announced at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub display_name: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            display_name: display_name.into(),
        }
    }
}

/// Tokens are opaque; the only requirement is non-empty without surrounding
/// whitespace.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.trim() == token
}

pub fn validate_endpoint(endpoint: &str) -> Result<Url, SessionError> {
    let url = Url::parse(endpoint).map_err(|e| SessionError::InvalidEndpoint {
        url: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(SessionError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// `$HOME/.agent-assist`, or `./.agent-assist` without a home directory.
pub fn config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-assist")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// The one value kept across runs: the operator's display name.
pub struct NicknameCache {
    path: PathBuf,
}

impl NicknameCache {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn new_default() -> Self {
        Self::new(config_dir().join("nickname"))
    }

    pub async fn load(&self) -> Option<String> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;
        let nickname = content.trim();
        if nickname.is_empty() {
            None
        } else {
            Some(nickname.to_string())
        }
    }

    pub async fn save(&self, nickname: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, nickname.trim()).await?;
        Ok(())
    }
}
