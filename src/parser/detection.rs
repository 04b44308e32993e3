//! Subscription format detection
//!
//! Subscriptions arrive either as a plain list of proxy URIs or as the same
//! list wrapped in Base64.

use tracing::debug;

use super::base64::decode_base64;

// ============================================================================
// Subscription Type Detection
// ============================================================================

/// Detected subscription content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionType {
    /// Base64 encoded URI list
    Base64UriList,
    /// Plain text URI list (one URI per line)
    PlainUriList,
    /// Unknown format
    Unknown,
}

impl std::fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionType::Base64UriList => write!(f, "Base64 URI List"),
            SubscriptionType::PlainUriList => write!(f, "Plain URI List"),
            SubscriptionType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Detects the type of subscription content
pub fn detect_subscription_type(content: &str) -> SubscriptionType {
    let trimmed = content.trim();
    let content_preview: String = trimmed.chars().take(100).collect();
    debug!(
        "Detecting subscription type, content length: {} bytes, preview: {:?}...",
        content.len(),
        content_preview
    );

    if trimmed.lines().any(|line| is_proxy_uri(line.trim())) {
        debug!("Detected plain URI list format");
        return SubscriptionType::PlainUriList;
    }

    if is_base64_content(trimmed) {
        debug!("Detected Base64 encoded URI list format");
        return SubscriptionType::Base64UriList;
    }

    debug!("Unable to detect subscription format");
    SubscriptionType::Unknown
}

/// Checks if a string looks like a supported proxy URI
pub fn is_proxy_uri(s: &str) -> bool {
    const PROTOCOLS: [&str; 6] = [
        "ss://",
        "vmess://",
        "vless://",
        "trojan://",
        "hysteria2://",
        "hy2://",
    ];

    PROTOCOLS.iter().any(|p| s.starts_with(p))
}

/// Checks if content appears to be a Base64 wrapped URI list
fn is_base64_content(content: &str) -> bool {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.len() < 4 {
        return false;
    }

    let is_valid_base64 = cleaned.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=' || c == '-' || c == '_'
    });

    if !is_valid_base64 {
        return false;
    }

    if let Ok(decoded) = decode_base64(&cleaned)
        && let Ok(decoded_str) = String::from_utf8(decoded)
    {
        return decoded_str.lines().any(|line| is_proxy_uri(line.trim()));
    }

    false
}
