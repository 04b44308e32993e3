//! Protocol codecs module
//!
//! One codec per supported scheme. Each codec turns a subscription URI into a
//! [`Proxy`] and back again. Dispatch is an exhaustive match over
//! [`ProxyType`], so adding a scheme means adding a variant and the compiler
//! points at every place that needs a codec.

mod hysteria2;
mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

pub use hysteria2::Hysteria2Codec;
pub use shadowsocks::ShadowsocksCodec;
pub use trojan::TrojanCodec;
pub use vless::VLessCodec;
pub use vmess::VMessCodec;

use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, anyhow, bail};
use tracing::debug;
use url::Url;

use crate::proxy::{Proxy, ProxyType};

// ============================================================================
// Protocol Codec Trait
// ============================================================================

/// Decoder/encoder pair for one URI scheme
pub trait ProtocolCodec {
    /// The proxy type this codec produces
    const PROXY_TYPE: ProxyType;

    /// Parses a URI string into a canonical proxy record
    fn decode(&self, uri: &str) -> Result<Proxy>;

    /// Serializes a proxy record into a URI of this scheme
    fn encode(&self, proxy: &Proxy) -> Result<String>;
}

// ============================================================================
// Dispatch
// ============================================================================

/// Decodes a URI whose scheme has already been resolved
pub fn decode_uri(proxy_type: ProxyType, uri: &str) -> Result<Proxy> {
    let result = match proxy_type {
        ProxyType::Ss => ShadowsocksCodec.decode(uri),
        ProxyType::Vmess => VMessCodec.decode(uri),
        ProxyType::Trojan => TrojanCodec.decode(uri),
        ProxyType::Vless => VLessCodec.decode(uri),
        ProxyType::Hysteria2 => Hysteria2Codec.decode(uri),
    };
    match &result {
        Ok(proxy) => debug!("Successfully parsed {} URI -> '{}'", proxy_type, proxy.name),
        Err(e) => debug!("Failed to parse {} URI: {}", proxy_type, e),
    }
    result
}

/// Encodes a record with the codec matching its type
pub fn encode_uri(proxy: &Proxy) -> Result<String> {
    match proxy.proxy_type {
        ProxyType::Ss => ShadowsocksCodec.encode(proxy),
        ProxyType::Vmess => VMessCodec.encode(proxy),
        ProxyType::Trojan => TrojanCodec.encode(proxy),
        ProxyType::Vless => VLessCodec.encode(proxy),
        ProxyType::Hysteria2 => Hysteria2Codec.encode(proxy),
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Extracts the scheme from a URI
pub fn extract_scheme(uri: &str) -> Result<&str> {
    if !uri.contains("://") {
        bail!("Invalid URI: missing scheme separator ://");
    }
    uri.split("://")
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("Invalid URI: missing scheme"))
}

/// Parses host:port string, handling IPv6 addresses in brackets
///
/// The returned host never carries brackets.
pub fn parse_host_port(hostport: &str) -> Result<(String, u16)> {
    if hostport.starts_with('[') {
        let bracket_end = hostport
            .find(']')
            .ok_or_else(|| anyhow!("Invalid IPv6 address: missing closing bracket"))?;

        let host = hostport[1..bracket_end].to_string();
        let port_str = hostport[bracket_end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("Missing port after IPv6 address"))?;

        return Ok((host, parse_port(port_str)?));
    }

    let colon_pos = hostport
        .rfind(':')
        .ok_or_else(|| anyhow!("Invalid host:port format: missing colon"))?;

    let host = hostport[..colon_pos].to_string();
    if host.is_empty() {
        bail!("Missing host in {}", hostport);
    }
    Ok((host, parse_port(&hostport[colon_pos + 1..])?))
}

/// Parses a port number, rejecting 0
pub fn parse_port(port_str: &str) -> Result<u16> {
    let port: u16 = port_str
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid port number: {}", port_str))?;
    if port == 0 {
        bail!("Invalid port number: 0");
    }
    Ok(port)
}

/// Formats a host for use inside a URI authority
pub fn format_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// Percent-decodes a component, falling back to the raw text
pub fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Parses a boolean query flag (`1` or `true`)
pub fn is_truthy(value: Option<&String>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// The pieces of a `scheme://user@host:port?query#name` URI
#[derive(Debug)]
pub struct AuthorityUri {
    pub user: String,
    pub server: String,
    pub port: u16,
    pub params: HashMap<String, String>,
    pub name: String,
}

impl AuthorityUri {
    /// Parses a trojan/vless/hysteria2 style URI
    ///
    /// A fragment-less URI is named after its endpoint.
    pub fn parse(uri: &str, label: &str) -> Result<Self> {
        let url = Url::parse(uri.trim())
            .map_err(|e| anyhow!("Failed to parse {} URI: {}", label, e))?;

        let mut user = percent_decode(url.username());
        if let Some(password) = url.password() {
            user.push(':');
            user.push_str(&percent_decode(password));
        }

        let server = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("{} URI missing host", label))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = url
            .port()
            .filter(|p| *p != 0)
            .ok_or_else(|| anyhow!("{} URI missing port", label))?;

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let name = url
            .fragment()
            .map(percent_decode)
            .unwrap_or_else(|| format!("{}:{}", format_host(&server), port));

        Ok(Self {
            user,
            server,
            port,
            params,
            name,
        })
    }
}

/// Builds `scheme://user@host:port?query#name`
///
/// Query keys are emitted in sorted order and form-encoded; the user part and
/// the name are percent-encoded.
pub fn build_authority_uri(
    scheme: &str,
    user: &str,
    proxy: &Proxy,
    query: &BTreeMap<&str, String>,
) -> String {
    let mut uri = format!(
        "{}://{}@{}:{}",
        scheme,
        urlencoding::encode(user),
        format_host(&proxy.server),
        proxy.port
    );

    if !query.is_empty() {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in query {
            serializer.append_pair(key, value);
        }
        uri.push('?');
        uri.push_str(&serializer.finish());
    }

    uri.push('#');
    uri.push_str(&urlencoding::encode(&proxy.name));
    uri
}
