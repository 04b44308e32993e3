//! Remote publishing of the structured document
//!
//! [`Publish`] is the seam for remote persistence. [`WebDavClient`] implements
//! it with plain WebDAV verbs: `MKCOL` for missing parent collections and `PUT`
//! for the document itself, with basic authentication when credentials are set.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::get_version;

/// Destination for a finished document
#[async_trait]
pub trait Publish: Send + Sync {
    /// Stores `document` remotely under the file name `name`
    async fn publish(&self, name: &str, document: &str) -> Result<()>;
}

// ============================================================================
// WebDAV Config
// ============================================================================

/// WebDAV settings for publishing the document
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct WebDavConfig {
    #[serde(default)]
    pub webdav_upload: bool,

    #[serde(default)]
    pub webdav_url: String,

    #[serde(default)]
    pub webdav_username: String,

    #[serde(default)]
    pub webdav_password: String,

    /// Remote path of the document; a trailing `/` keeps the local file name
    #[serde(default)]
    pub upload_path: String,
}

impl WebDavConfig {
    /// Check if WebDAV upload is enabled and properly configured
    pub fn is_configured(&self) -> bool {
        self.webdav_upload && !self.webdav_url.is_empty() && !self.upload_path.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.webdav_upload {
            return Ok(());
        }
        if self.webdav_url.is_empty() {
            bail!("WebDAV URL is required when webdav_upload is enabled");
        }
        if self.upload_path.is_empty() {
            bail!("Upload path is required when webdav_upload is enabled");
        }
        if !self.webdav_url.starts_with("http://") && !self.webdav_url.starts_with("https://") {
            bail!("WebDAV URL must start with http:// or https://");
        }
        Ok(())
    }

    /// Remote path for a document named `name`
    pub fn remote_path(&self, name: &str) -> String {
        let path = self.upload_path.trim();
        if path.is_empty() {
            format!("/{}", name)
        } else if path.ends_with('/') {
            format!("{}{}", path, name)
        } else {
            path.to_string()
        }
    }
}

// ============================================================================
// WebDAV Client
// ============================================================================

pub struct WebDavClient {
    client: Client,
    config: WebDavConfig,
}

impl WebDavClient {
    pub fn new(config: WebDavConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .user_agent(format!("nodesift/{}", get_version()))
            .build()
            .context("Failed to build HTTP client for WebDAV")?;

        Ok(Self { client, config })
    }

    /// Build the full URL for a remote path
    fn build_url(&self, path: &str) -> String {
        let base_url = self.config.webdav_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base_url.to_string()
        } else {
            format!("{}/{}", base_url, path)
        }
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        if self.config.webdav_username.is_empty() {
            builder
        } else {
            builder.basic_auth(
                &self.config.webdav_username,
                Some(&self.config.webdav_password),
            )
        }
    }

    async fn put_content(&self, url: &str, content: &str) -> Result<()> {
        let response = self
            .request(Method::PUT, url)
            .header("Content-Type", "application/yaml; charset=utf-8")
            .header("Overwrite", "T")
            .body(content.to_string())
            .send()
            .await
            .with_context(|| format!("Failed to upload to WebDAV: {}", url))?;

        let status = response.status();
        debug!("WebDAV PUT response status: {}", status);

        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::UNAUTHORIZED => {
                bail!("WebDAV authentication failed. Please check your username and password.")
            }
            StatusCode::FORBIDDEN => bail!("WebDAV access forbidden for {}", url),
            StatusCode::CONFLICT => {
                bail!("WebDAV conflict. The parent collection may not exist: {}", url)
            }
            StatusCode::INSUFFICIENT_STORAGE => {
                bail!("WebDAV server has insufficient storage space.")
            }
            StatusCode::LOCKED => bail!("WebDAV resource is locked: {}", url),
            _ => {
                let body = response.text().await.unwrap_or_default();
                bail!(
                    "WebDAV upload failed with status {}: {}",
                    status,
                    if body.is_empty() { "No response body" } else { body.as_str() }
                )
            }
        }
    }

    /// Creates a collection, treating "already exists" answers as success
    async fn mkcol(&self, path: &str) -> Result<()> {
        let url = self.build_url(path);
        let method = Method::from_bytes(b"MKCOL").map_err(|e| anyhow!("Invalid method: {}", e))?;
        let response = self
            .request(method, &url)
            .send()
            .await
            .with_context(|| format!("Failed to create collection: {}", url))?;

        let status = response.status();
        debug!("WebDAV MKCOL {} -> {}", path, status);

        match status {
            StatusCode::CREATED => {
                info!("Created WebDAV collection: {}", path);
                Ok(())
            }
            StatusCode::UNAUTHORIZED => bail!("WebDAV authentication failed for MKCOL"),
            // 405 and 301 usually mean the collection already exists
            _ => Ok(()),
        }
    }

    async fn ensure_parent_collections(&self, path: &str) -> Result<()> {
        let parts: Vec<&str> = path
            .trim_start_matches('/')
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() <= 1 {
            return Ok(());
        }

        let mut current = String::new();
        for part in &parts[..parts.len() - 1] {
            current.push('/');
            current.push_str(part);
            self.mkcol(&current).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Publish for WebDavClient {
    async fn publish(&self, name: &str, document: &str) -> Result<()> {
        let remote_path = self.config.remote_path(name);
        let url = self.build_url(&remote_path);
        info!("Uploading {} to WebDAV: {}", name, url);

        if let Err(e) = self.ensure_parent_collections(&remote_path).await {
            warn!("Failed to create parent collections: {:#}", e);
        }

        self.put_content(&url, document).await?;
        info!("Successfully uploaded {} to WebDAV", name);
        Ok(())
    }
}
