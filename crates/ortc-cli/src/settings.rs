//! CLI settings: an optional TOML file overridden by flags and env vars

use anyhow::{bail, Context, Result};
use ortc_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of the settings file.
///
/// ```toml
/// app_key = "myAppKey"
/// auth_token = "myToken"
///
/// [client]
/// cluster_url = "https://ortc-developers.realtime.co/server/2.1"
/// heartbeat_active = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_key: Option<String>,
    pub auth_token: Option<String>,
    pub private_key: Option<String>,
    pub client: ClientConfig,
}

/// Values given on the command line (or through `ORTC_*` variables)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub cluster_url: Option<String>,
    pub app_key: Option<String>,
    pub auth_token: Option<String>,
    pub private_key: Option<String>,
}

impl Settings {
    /// Parse a settings file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut settings: Settings = toml::from_str(content)?;
        settings.infer_mode();
        Ok(settings)
    }

    /// Load `explicit` if given, else the default file when it exists
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = default_settings_file();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply command-line values; a URL flag switches the connection mode
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.url {
            self.client.set_url(&url);
        }
        if let Some(cluster_url) = overrides.cluster_url {
            self.client.set_cluster_url(&cluster_url);
        }
        if overrides.app_key.is_some() {
            self.app_key = overrides.app_key;
        }
        if overrides.auth_token.is_some() {
            self.auth_token = overrides.auth_token;
        }
        if overrides.private_key.is_some() {
            self.private_key = overrides.private_key;
        }
    }

    pub fn app_key(&self) -> Result<&str> {
        match self.app_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("No application key; pass --app-key or set ORTC_APP_KEY"),
        }
    }

    pub fn auth_token(&self) -> Result<&str> {
        match self.auth_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(token),
            _ => bail!("No authentication token; pass --auth-token or set ORTC_AUTH_TOKEN"),
        }
    }

    pub fn private_key(&self) -> Result<&str> {
        match self.private_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("No private key; pass --private-key or set ORTC_PRIVATE_KEY"),
        }
    }

    /// A file naming only a cluster URL means cluster mode
    fn infer_mode(&mut self) {
        if !self.client.is_cluster && self.client.url.is_empty() && !self.client.cluster_url.is_empty() {
            self.client.is_cluster = true;
        }
    }
}

/// `<config dir>/ortc/config.toml`
pub fn default_settings_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ortc")
        .join("config.toml")
}
