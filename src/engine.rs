//! Forwarding engine lifecycle
//!
//! The engine is an external proxy process (an Xray-compatible core) that owns
//! one outbound per candidate. Probe traffic enters through its local SOCKS5
//! inbound, and the SOCKS username selects the outbound: it is the candidate's
//! `server:port` key.
//!
//! The process is killed on [`ForwardingEngine::stop`] and, as a fallback, when
//! the handle is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::prober::ProbeRoute;
use crate::proxy::Proxy;

/// Interval between readiness dials
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Engine Config
// ============================================================================

/// `[engine]` section of the configuration file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Engine executable, relative paths resolve against the current directory
    #[serde(default = "default_binary")]
    pub binary: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory of the engine process, empty for the current one
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Address that accepts TCP connections once the engine is up
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Local SOCKS5 inbound used for probe traffic
    #[serde(default = "default_proxy_addr")]
    pub proxy_addr: String,

    /// Password sent alongside the routing username
    #[serde(default = "default_socks_password")]
    pub socks_password: String,

    /// Readiness deadline in milliseconds
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: default_args(),
            workdir: default_workdir(),
            api_addr: default_api_addr(),
            proxy_addr: default_proxy_addr(),
            socks_password: default_socks_password(),
            startup_timeout: default_startup_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn startup_deadline(&self) -> Duration {
        Duration::from_millis(self.startup_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            bail!("engine.binary must not be empty");
        }
        if self.api_addr.trim().is_empty() {
            bail!("engine.api_addr must not be empty");
        }
        if self.proxy_addr.trim().is_empty() {
            bail!("engine.proxy_addr must not be empty");
        }
        if self.startup_timeout == 0 {
            bail!("engine.startup_timeout must be greater than 0");
        }
        Ok(())
    }
}

fn default_binary() -> String {
    if cfg!(windows) {
        "xray/xray.exe".to_string()
    } else {
        "xray/xray".to_string()
    }
}

fn default_args() -> Vec<String> {
    vec!["-config".to_string(), "config.json".to_string()]
}

fn default_workdir() -> String {
    "xray".to_string()
}

fn default_api_addr() -> String {
    "127.0.0.1:10085".to_string()
}

fn default_proxy_addr() -> String {
    "127.0.0.1:10808".to_string()
}

fn default_socks_password() -> String {
    "nodesift".to_string()
}

fn default_startup_timeout() -> u64 {
    5000
}

// ============================================================================
// Forwarding Engine
// ============================================================================

/// Handle to a running engine process
#[derive(Debug)]
pub struct ForwardingEngine {
    child: Option<Child>,
    api_addr: String,
    proxy_addr: String,
    socks_password: String,
}

impl ForwardingEngine {
    /// Spawns the engine and waits until its API address accepts connections
    ///
    /// The process is killed again when it does not become ready in time.
    pub async fn start(config: &EngineConfig) -> Result<Self> {
        let mut engine = Self::spawn(config)?;
        if let Err(e) = engine.wait_ready(config.startup_deadline()).await {
            if let Err(stop_err) = engine.stop().await {
                warn!("Failed to stop forwarding engine: {:#}", stop_err);
            }
            return Err(e.context("Forwarding engine failed to start"));
        }
        info!("Forwarding engine ready on {}", engine.api_addr);
        Ok(engine)
    }

    /// Spawns the engine process without waiting for readiness
    pub fn spawn(config: &EngineConfig) -> Result<Self> {
        let program = resolve_path(&config.binary)?;
        debug!("Starting forwarding engine: {:?} {:?}", program, config.args);

        let mut command = Command::new(&program);
        command
            .args(&config.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !config.workdir.is_empty() {
            command.current_dir(resolve_path(&config.workdir)?);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn forwarding engine {:?}", program))?;

        Ok(Self {
            child: Some(child),
            api_addr: config.api_addr.clone(),
            proxy_addr: config.proxy_addr.clone(),
            socks_password: config.socks_password.clone(),
        })
    }

    /// Polls the API address every 100ms until it accepts a TCP connection
    pub async fn wait_ready(&mut self, deadline: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if let Some(child) = self.child.as_mut()
                && let Some(status) = child
                    .try_wait()
                    .context("Failed to poll forwarding engine")?
            {
                self.child = None;
                bail!("Forwarding engine exited early with {}", status);
            }

            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                bail!(
                    "Timed out after {:?} waiting for forwarding engine on {}",
                    deadline,
                    self.api_addr
                );
            }

            match tokio::time::timeout(remaining, TcpStream::connect(&self.api_addr)).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => debug!("Engine not ready on {}: {}", self.api_addr, e),
                Err(_) => continue,
            }

            tokio::time::sleep(READY_POLL_INTERVAL.min(remaining)).await;
        }
    }

    /// Kills the engine process
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .context("Failed to kill forwarding engine")?;
            info!("Forwarding engine stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl Drop for ForwardingEngine {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

impl ProbeRoute for ForwardingEngine {
    fn client_for(&self, proxy: &Proxy) -> Result<Client> {
        let url = socks_route_url(&self.proxy_addr, &proxy.endpoint_key(), &self.socks_password);
        let route = reqwest::Proxy::all(&url)
            .map_err(|e| anyhow!("Invalid SOCKS route for {}: {}", proxy.endpoint_key(), e))?;
        Client::builder()
            .proxy(route)
            .build()
            .context("Failed to build probe client")
    }
}

/// SOCKS5 URL whose username selects the outbound for `key`
///
/// Uses `socks5h` so that name resolution also happens inside the engine.
pub fn socks_route_url(proxy_addr: &str, key: &str, password: &str) -> String {
    format!(
        "socks5h://{}:{}@{}",
        urlencoding::encode(key),
        urlencoding::encode(password),
        proxy_addr
    )
}

/// Makes relative multi-component paths absolute against the current directory
fn resolve_path(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    if candidate.is_absolute() || candidate.components().count() <= 1 {
        return Ok(candidate.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to get working directory")?;
    Ok(cwd.join(candidate))
}
