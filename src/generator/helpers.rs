//! Pipeline utility functions
//!
//! Path expansion, HTTP fetching and best-effort file writes used by the
//! pipeline and the configuration loader.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::get_version;

// ============================================================================
// Path Utilities
// ============================================================================

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = dirs_home()
    {
        return path.replacen("~", &home, 1);
    }
    path.to_string()
}

/// Get home directory path
pub fn dirs_home() -> Option<String> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME").ok()
    }
}

/// Whether a source string is an HTTP(S) URL rather than a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

// ============================================================================
// HTTP Utilities
// ============================================================================

/// Fetch text content from a URL
pub async fn fetch_text(url: &str) -> Result<String> {
    debug!("Fetching URL: {}", url);

    let client = reqwest::Client::builder()
        .user_agent(format!("nodesift/{}", get_version()))
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch URL: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("HTTP request failed with status {}: {}", status, url);
    }

    response
        .text()
        .await
        .with_context(|| format!("Failed to read response body from: {}", url))
}

/// Read a subscription source, fetching URLs and reading anything else from disk
pub async fn read_source(source: &str) -> Result<String> {
    if is_url(source) {
        fetch_text(source).await
    } else {
        let expanded = expand_tilde(source);
        tokio::fs::read_to_string(&expanded)
            .await
            .with_context(|| format!("Failed to read subscription file {}", expanded))
    }
}

// ============================================================================
// File Utilities
// ============================================================================

/// Writes `content` to `path`, creating parent directories
pub async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create output directory {:?}", parent))?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {:?}", path))
}

/// Like [`write_file`], but only logs a warning on failure
pub async fn write_file_best_effort(path: &Path, content: &str) -> bool {
    match write_file(path, content).await {
        Ok(()) => {
            debug!("Wrote {} bytes to {:?}", content.len(), path);
            true
        }
        Err(e) => {
            warn!("{:#}", e);
            false
        }
    }
}
