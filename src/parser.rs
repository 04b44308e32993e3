//! Subscription and Protocol Parsing Module
//!
//! This module provides functionality for:
//! - Detecting subscription content types (Base64 URI list, plain URI list)
//! - Decoding content (handling Base64 encoding with various line break scenarios)
//! - Parsing protocol URIs (ss://, vmess://, vless://, trojan://, hysteria2://)
//! - Counting per-scheme successes and failures while parsing

pub mod base64;
pub mod detection;
pub mod protocols;

pub use base64::{decode_base64, decode_subscription_content};
pub use detection::{SubscriptionType, detect_subscription_type};
pub use protocols::{decode_uri, encode_uri};

use anyhow::{Result, anyhow};
use tracing::{debug, trace, warn};

use crate::proxy::{Proxy, ProxyStats, ProxyType};

// ============================================================================
// Line Parsing
// ============================================================================

/// Outcome of parsing a single subscription line
#[derive(Debug)]
pub enum LineOutcome {
    /// Decoded into a proxy record
    Parsed(Proxy),
    /// A supported scheme that failed to decode
    Failed(ProxyType, anyhow::Error),
    /// Blank, comment, or unsupported scheme
    Skipped,
}

/// Parses one subscription line
pub fn parse_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return LineOutcome::Skipped;
    }

    let Some(proxy_type) = resolve_type(line) else {
        trace!("Skipping unsupported line: {}", line);
        return LineOutcome::Skipped;
    };

    match decode_uri(proxy_type, line) {
        Ok(proxy) => LineOutcome::Parsed(proxy),
        Err(e) => LineOutcome::Failed(proxy_type, e),
    }
}

/// Resolves the proxy type of a URI line from its scheme
fn resolve_type(line: &str) -> Option<ProxyType> {
    protocols::extract_scheme(line)
        .ok()
        .and_then(ProxyType::from_scheme)
}

/// Parses a single URI, returning an error for unsupported schemes
pub fn parse_proxy_uri(uri: &str) -> Result<Proxy> {
    let scheme = protocols::extract_scheme(uri.trim())?;
    let proxy_type = ProxyType::from_scheme(scheme)
        .ok_or_else(|| anyhow!("No decoder for scheme: {}", scheme))?;
    decode_uri(proxy_type, uri.trim())
}

// ============================================================================
// Subscription Parsing
// ============================================================================

/// Parses every line of an already-decoded URI list
///
/// Malformed lines are counted against their scheme and dropped; parsing
/// always continues with the next line.
pub fn parse_uri_list(content: &str, stats: &mut ProxyStats) -> Vec<Proxy> {
    let mut proxies = Vec::new();

    for line in content.lines() {
        match parse_line(line) {
            LineOutcome::Parsed(proxy) => {
                stats.record_success(proxy.proxy_type);
                proxies.push(proxy);
            }
            LineOutcome::Failed(proxy_type, e) => {
                warn!("Failed to parse {} URI: {:#}", proxy_type, e);
                stats.record_failure(proxy_type);
            }
            LineOutcome::Skipped => {
                if !line.trim().is_empty() {
                    stats.record_skipped();
                }
            }
        }
    }

    debug!(
        "URI list parsing complete: {} successful, {} failed, {} skipped",
        stats.total_success, stats.total_fail, stats.skipped
    );

    proxies
}

/// Decodes raw subscription content (Base64 or plain) and parses it
pub fn parse_subscription(content: &str, stats: &mut ProxyStats) -> Vec<Proxy> {
    let kind = detect_subscription_type(content);
    debug!("Subscription content detected as {}", kind);

    match decode_subscription_content(content, kind) {
        Ok(decoded) => parse_uri_list(&decoded, stats),
        Err(e) => {
            warn!("Failed to decode subscription content: {:#}", e);
            Vec::new()
        }
    }
}
