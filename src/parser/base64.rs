//! Base64 helpers
//!
//! Subscription payloads, `ss://` userinfo and `vmess://` bodies show up in
//! standard and URL-safe alphabets, with or without padding and sometimes
//! wrapped across lines. Decoding tries each variant in turn.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use tracing::trace;

use super::detection::SubscriptionType;

// ============================================================================
// Base64 Decoding
// ============================================================================

/// Decodes Base64 content, trying multiple variants
///
/// Attempts to decode the content using:
/// 1. Standard Base64
/// 2. URL-safe Base64
/// 3. URL-safe Base64 without padding
/// 4. Standard/URL-safe with padding added
///
/// Whitespace in the input is removed before decoding.
pub fn decode_base64(content: &str) -> Result<Vec<u8>> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    trace!(
        "Attempting Base64 decode, cleaned length: {} bytes",
        cleaned.len()
    );

    if let Ok(decoded) = STANDARD.decode(&cleaned) {
        trace!("Decoded using standard Base64");
        return Ok(decoded);
    }

    if let Ok(decoded) = URL_SAFE.decode(&cleaned) {
        trace!("Decoded using URL-safe Base64");
        return Ok(decoded);
    }

    if let Ok(decoded) = URL_SAFE_NO_PAD.decode(&cleaned) {
        trace!("Decoded using URL-safe Base64 without padding");
        return Ok(decoded);
    }

    let padded = add_base64_padding(&cleaned);
    if let Ok(decoded) = STANDARD.decode(&padded) {
        trace!("Decoded using standard Base64 with added padding");
        return Ok(decoded);
    }
    if let Ok(decoded) = URL_SAFE.decode(&padded) {
        trace!("Decoded using URL-safe Base64 with added padding");
        return Ok(decoded);
    }

    bail!("Failed to decode Base64 content")
}

/// Decodes Base64 content that must be UTF-8 text
pub fn decode_base64_str(content: &str) -> Result<String> {
    let bytes = decode_base64(content)?;
    String::from_utf8(bytes).context("Decoded Base64 content is not valid UTF-8")
}

/// Encodes bytes with the standard padded alphabet
pub fn encode_base64(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(data)
}

/// Adds `=` padding until the length is a multiple of 4
pub fn add_base64_padding(s: &str) -> String {
    let mut result = s.to_string();
    while !result.len().is_multiple_of(4) {
        result.push('=');
    }
    result
}

/// Decodes subscription content of an already detected `kind`
///
/// Content that is not a Base64 URI list is returned as-is.
pub fn decode_subscription_content(content: &str, kind: SubscriptionType) -> Result<String> {
    match kind {
        SubscriptionType::Base64UriList => decode_base64_str(content.trim()),
        _ => Ok(content.to_string()),
    }
}
