//! Application configuration
//!
//! Loaded from a TOML file where every field is optional. A missing file falls
//! back to the built-in defaults; a file that exists but does not parse or
//! validate is fatal. WebDAV credentials may be overridden from the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::EngineConfig;
use crate::generator::helpers::{expand_tilde, fetch_text, is_url};
use crate::generator::subscription::Subscription;
use crate::prober::{ProbeConfig, TestMode};
use crate::transform::Thresholds;
use crate::webdav::WebDavConfig;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding `webdav_username`
pub const ENV_WEBDAV_USERNAME: &str = "NODESIFT_WEBDAV_USERNAME";

/// Environment variable overriding `webdav_password`
pub const ENV_WEBDAV_PASSWORD: &str = "NODESIFT_WEBDAV_PASSWORD";

// ============================================================================
// App Config
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AppConfig {
    /// Subscription sources, each a URL or a local file path
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,

    /// Reference payload downloaded by the throughput probe
    #[serde(default = "default_speed_test_url")]
    pub speed_test_url: String,

    /// URL requested by the latency probe
    #[serde(default = "default_tcp_test_url")]
    pub tcp_test_url: String,

    /// Maximum number of probes in flight
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,

    /// Per-probe deadline in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Minimum throughput in KiB/s
    #[serde(default = "default_min_speed")]
    pub min_speed: f64,

    /// Maximum accepted latency in milliseconds
    #[serde(default = "default_tcp_test_max_latency")]
    pub tcp_test_max_latency: u64,

    /// Seconds to wait for the test mode answer before choosing "no test"
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout: u64,

    /// Directory receiving `{raw,tcp,speed,best}.yaml`
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_unique_nodes_file")]
    pub unique_nodes_file: String,

    #[serde(default = "default_run_log")]
    pub run_log: String,

    #[serde(default = "default_parsing_log")]
    pub parsing_log: String,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Enable WebDAV upload of the structured document
    #[serde(default)]
    pub webdav_upload: bool,

    /// WebDAV server URL (e.g., "https://example.com/dav")
    #[serde(default)]
    pub webdav_url: String,

    #[serde(default)]
    pub webdav_username: String,

    #[serde(default)]
    pub webdav_password: String,

    /// Remote path, a trailing `/` uploads under the document's own file name
    #[serde(default)]
    pub upload_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            speed_test_url: default_speed_test_url(),
            tcp_test_url: default_tcp_test_url(),
            concurrent: default_concurrent(),
            timeout: default_timeout(),
            min_speed: default_min_speed(),
            tcp_test_max_latency: default_tcp_test_max_latency(),
            prompt_timeout: default_prompt_timeout(),
            output_dir: default_output_dir(),
            unique_nodes_file: default_unique_nodes_file(),
            run_log: default_run_log(),
            parsing_log: default_parsing_log(),
            engine: EngineConfig::default(),
            webdav_upload: false,
            webdav_url: String::new(),
            webdav_username: String::new(),
            webdav_password: String::new(),
            upload_path: String::new(),
        }
    }
}

impl AppConfig {
    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path or URL
    ///
    /// A local file that does not exist yields the defaults. Environment
    /// overrides are applied in every case.
    pub async fn load(path_or_url: &str) -> Result<Self> {
        let mut config = if is_url(path_or_url) {
            info!("Loading config from {}", path_or_url);
            Self::from_toml(&fetch_text(path_or_url).await?)?
        } else {
            let expanded = expand_tilde(path_or_url);
            let path = Path::new(&expanded);
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                info!("Loading config from {:?}", path);
                Self::from_file(path).await?
            } else {
                warn!("Config file {:?} not found, using default config", path);
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Replaces WebDAV credentials with non-empty values from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(username) = lookup(ENV_WEBDAV_USERNAME).filter(|v| !v.is_empty()) {
            debug!("WebDAV username overridden from {}", ENV_WEBDAV_USERNAME);
            self.webdav_username = username;
        }
        if let Some(password) = lookup(ENV_WEBDAV_PASSWORD).filter(|v| !v.is_empty()) {
            debug!("WebDAV password overridden from {}", ENV_WEBDAV_PASSWORD);
            self.webdav_password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent == 0 {
            bail!("concurrent must be at least 1");
        }
        if self.timeout == 0 {
            bail!("timeout must be greater than 0");
        }
        if !self.min_speed.is_finite() || self.min_speed < 0.0 {
            bail!("min_speed must be a non-negative number");
        }
        for subscription in &self.subscriptions {
            if subscription.url.trim().is_empty() {
                bail!("Subscription url must not be empty");
            }
        }
        self.engine.validate()?;
        self.get_webdav_config().validate()?;
        Ok(())
    }

    /// Get the WebDAV configuration from the flat config fields
    pub fn get_webdav_config(&self) -> WebDavConfig {
        WebDavConfig {
            webdav_upload: self.webdav_upload,
            webdav_url: self.webdav_url.clone(),
            webdav_username: self.webdav_username.clone(),
            webdav_password: self.webdav_password.clone(),
            upload_path: self.upload_path.clone(),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            concurrency: self.concurrent,
            timeout: Duration::from_millis(self.timeout),
            tcp_test_url: self.tcp_test_url.clone(),
            speed_test_url: self.speed_test_url.clone(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_speed: self.min_speed,
            max_latency: self.tcp_test_max_latency,
        }
    }

    pub fn prompt_deadline(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout)
    }

    /// Path of the structured document for a test mode
    pub fn document_path(&self, mode: TestMode) -> PathBuf {
        PathBuf::from(expand_tilde(&self.output_dir)).join(format!("{}.yaml", mode.output_stem()))
    }

    pub fn unique_nodes_path(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.unique_nodes_file))
    }

    pub fn run_log_path(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.run_log))
    }

    pub fn parsing_log_path(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.parsing_log))
    }
}

fn default_speed_test_url() -> String {
    "https://speed.cloudflare.com/__down?bytes=10485760".to_string()
}

fn default_tcp_test_url() -> String {
    "https://www.apple.com/library/test/success.html".to_string()
}

fn default_concurrent() -> usize {
    5
}

fn default_timeout() -> u64 {
    15000
}

fn default_min_speed() -> f64 {
    256.0
}

fn default_tcp_test_max_latency() -> u64 {
    3000
}

fn default_prompt_timeout() -> u64 {
    10
}

fn default_output_dir() -> String {
    ".".to_string()
}

fn default_unique_nodes_file() -> String {
    "uniqueNodes.txt".to_string()
}

fn default_run_log() -> String {
    "runlog.txt".to_string()
}

fn default_parsing_log() -> String {
    "parsingLog.txt".to_string()
}

// ============================================================================
// Tests
// ============================================================================
