//! TOML configuration with environment overrides.
//!
//! Resolution: explicit path, then `DEPLOYDECK_CONFIG`, then
//! `./deploydeck.toml`, then compiled-in defaults. The `SSH_*` / `DEPLOY_*`
//! environment variables are applied on top of whichever file was loaded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::deploy::transport::SshTarget;
use crate::deploy::DeployJob;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DEPLOYDECK_CONFIG";

/// Config file picked up from the working directory when nothing else is set.
pub const DEFAULT_CONFIG_FILE: &str = "deploydeck.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SSH password is not configured (set [ssh].password, or SSH_PASSWORD in the environment or .env)")]
    MissingPassword,

    #[error("invalid SSH port {0:?}")]
    InvalidPort(String),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub deploy: TargetConfig,
}

impl DeployConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the config file, load it, and apply environment overrides.
    ///
    /// An explicitly requested file that cannot be loaded is an error; the
    /// implicit locations fall back to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        config
            .apply_env(|key| std::env::var(key).ok())
            .context("invalid environment override")?;
        Ok(config)
    }

    /// Try `DEPLOYDECK_CONFIG`, then `./deploydeck.toml`, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "DEPLOYDECK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Apply `SSH_HOST`, `SSH_PORT`, `SSH_USERNAME`, `SSH_PASSWORD`,
    /// `DEPLOY_PATH` and `DEPLOY_SCRIPT` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SSH_HOST") {
            self.ssh.host = host;
        }
        if let Some(port) = lookup("SSH_PORT") {
            self.ssh.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        if let Some(username) = lookup("SSH_USERNAME") {
            self.ssh.username = username;
        }
        if let Some(password) = lookup("SSH_PASSWORD") {
            self.ssh.password = Zeroizing::new(password);
        }
        if let Some(path) = lookup("DEPLOY_PATH") {
            self.deploy.path = path;
        }
        if let Some(script) = lookup("DEPLOY_SCRIPT") {
            self.deploy.script = script;
        }
        Ok(())
    }

    /// Startup precondition: a password must be configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh.password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        Ok(())
    }

    /// Build the job the executor runs.
    pub fn job(&self) -> DeployJob {
        DeployJob {
            target: SshTarget {
                host: self.ssh.host.clone(),
                port: self.ssh.port,
                connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
            },
            username: self.ssh.username.clone(),
            password: self.ssh.password.clone(),
            path: self.deploy.path.clone(),
            script: self.deploy.script.clone(),
        }
    }

    /// Configuration safe to show to a browser: no secrets.
    pub fn public_view(&self) -> PublicConfig {
        PublicConfig {
            host: self.ssh.host.clone(),
            port: self.ssh.port,
            username: self.ssh.username.clone(),
            deploy_path: self.deploy.path.clone(),
            deploy_script: self.deploy.script.clone(),
            has_password: !self.ssh.password.is_empty(),
        }
    }
}

/// Sanitized view served by `GET /api/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub deploy_path: String,
    pub deploy_script: String,
    pub has_password: bool,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub bind: String,
    /// Directory holding the front-end page, served at `/` when set.
    pub static_dir: Option<PathBuf>,
    /// How long a log stream waits for a record before sending a heartbeat.
    pub log_poll_interval_ms: u64,
}

impl ServerConfig {
    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            static_dir: None,
            log_poll_interval_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// SSH
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(
        serialize_with = "serialize_redacted",
        deserialize_with = "deserialize_secret"
    )]
    pub password: Zeroizing<String>,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "deploy".to_string(),
            password: Zeroizing::new(String::new()),
            connect_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

fn serialize_redacted<S>(_: &Zeroizing<String>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str("")
}

fn deserialize_secret<'de, D>(d: D) -> Result<Zeroizing<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut raw = String::deserialize(d)?;
    let secret = Zeroizing::new(raw.clone());
    raw.zeroize();
    Ok(secret)
}

// ---------------------------------------------------------------------------
// Deploy target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Remote working directory.
    pub path: String,
    /// Script run from `path`.
    pub script: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: "/srv/app".to_string(),
            script: "./deploy.sh".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
