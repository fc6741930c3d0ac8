use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

const STATE_DIR: &str = ".rc";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("not configured: {0}")]
    NotConfigured(&'static str),
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("unable to determine home directory")]
    NoHome,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(value: toml::ser::Error) -> Self {
        ConfigError::Toml(value.to_string())
    }
}

/// `~/.rc`, home of the config file and the cursor store.
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    let base = BaseDirs::new().ok_or(ConfigError::NoHome)?;
    Ok(base.home_dir().join(STATE_DIR))
}

/// Endpoint and credential storage.
///
/// Either field may be unset; [`ClientConfig::endpoint`] reports the
/// "not configured" state explicitly instead of falling back to a guess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(state_dir()?.join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized = toml::to_string_pretty(self)?;
        write_private(path, serialized.as_bytes())?;
        Ok(())
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_base_url(&mut self, url: Option<String>) {
        self.base_url = non_blank(url);
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = non_blank(token);
    }

    pub fn clear(&mut self) {
        self.base_url = None;
        self.token = None;
    }

    /// Applies explicit overrides on top of the stored values. Blank values are ignored.
    pub fn with_overrides(mut self, base_url: Option<String>, token: Option<String>) -> Self {
        if let Some(url) = non_blank(base_url) {
            self.base_url = Some(url);
        }
        if let Some(token) = non_blank(token) {
            self.token = Some(token);
        }
        self
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let base = self
            .base_url()
            .ok_or(ConfigError::NotConfigured("no base url; run `rc config set --base-url <url>`"))?;
        Endpoint::new(base, self.token.clone())
    }
}

/// A validated server base URL plus the long-lived bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base_url: Url,
    token: Option<String>,
}

impl Endpoint {
    pub fn new(base: impl AsRef<str>, token: Option<String>) -> Result<Self, ConfigError> {
        let trimmed = base.as_ref().trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::NotConfigured("base url cannot be empty"));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("{}{trimmed}", infer_scheme(trimmed))
        };
        let base_url = Url::parse(&with_scheme).map_err(|err| ConfigError::InvalidBaseUrl {
            url: trimmed.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme '{}'", base_url.scheme()),
            });
        }
        let token = token
            .map(|t| t.trim().trim_start_matches("Bearer ").trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(Self { base_url, token })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Joins an absolute path (`/api/...`) onto the base, keeping any base path prefix.
    pub fn url_for(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{path}"));
        url.set_query(None);
        url
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host = host_part.to_ascii_lowercase();
    let private_172 = host
        .strip_prefix("172.")
        .and_then(|rest| rest.split('.').next())
        .and_then(|octet| octet.parse::<u8>().ok())
        .map(|octet| (16..32).contains(&octet))
        .unwrap_or(false);
    if host.starts_with("localhost")
        || host.starts_with("127.")
        || host.starts_with("0.0.0.0")
        || host == "::1"
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || private_172
    {
        "http://"
    } else {
        "https://"
    }
}

/// Writes `bytes` to `path` readable by the owner only, creating parent dirs.
pub(crate) fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}
