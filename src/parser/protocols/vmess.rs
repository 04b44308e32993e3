//! VMess protocol codec
//!
//! VMess URIs are Base64 encoded JSON documents (the v2rayN "v2" share format).

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::parser::base64::{decode_base64_str, encode_base64};
use crate::proxy::{Proxy, ProxyType};

use super::{ProtocolCodec, format_host};

// ============================================================================
// VMess Codec
// ============================================================================

/// Codec for VMess (vmess://) URIs
///
/// vmess://BASE64({ "v": "2", "ps": "name", "add": "host", "port": 443, ... })
pub struct VMessCodec;

/// VMess URI JSON structure, in share-link field order
#[derive(Serialize, Deserialize, Debug, Default)]
struct VMessJson {
    /// Version (usually "2")
    #[serde(default, deserialize_with = "deserialize_string")]
    v: String,
    /// Remark/name
    #[serde(default)]
    ps: String,
    /// Server address
    add: String,
    /// Server port (can be string or number)
    #[serde(deserialize_with = "deserialize_port")]
    port: u16,
    /// UUID
    id: String,
    /// Alter ID (can be string or number)
    #[serde(default, deserialize_with = "deserialize_u32")]
    aid: u32,
    /// Security/encryption method
    #[serde(default)]
    scy: String,
    /// Network type (tcp, ws, etc.)
    #[serde(default)]
    net: String,
    /// Header type
    #[serde(default, rename = "type")]
    header_type: String,
    /// "tls" or empty
    #[serde(default)]
    tls: String,
    /// SNI
    #[serde(default)]
    sni: String,
    /// WebSocket path
    #[serde(default, skip_serializing_if = "String::is_empty")]
    path: String,
    /// WebSocket host
    #[serde(default, skip_serializing_if = "String::is_empty")]
    host: String,
}

impl ProtocolCodec for VMessCodec {
    const PROXY_TYPE: ProxyType = ProxyType::Vmess;

    fn decode(&self, uri: &str) -> Result<Proxy> {
        let uri = uri.trim();
        trace!("Parsing VMess URI");

        let encoded = uri
            .strip_prefix("vmess://")
            .ok_or_else(|| anyhow!("Invalid VMess URI: missing vmess:// prefix"))?;

        let decoded = decode_base64_str(encoded).context("Failed to decode VMess URI")?;
        trace!("Decoded VMess JSON: {}", decoded);

        let json: VMessJson =
            serde_json::from_str(&decoded).context("Failed to parse VMess JSON")?;

        if json.add.is_empty() {
            bail!("VMess URI missing server address");
        }
        if json.port == 0 {
            bail!("VMess URI has invalid port 0");
        }
        if json.id.is_empty() {
            bail!("VMess URI missing UUID");
        }

        trace!(
            "VMess config: server={}:{}, uuid={}, net={:?}, tls={:?}",
            json.add, json.port, json.id, json.net, json.tls
        );

        let name = if json.ps.is_empty() {
            format!("{}:{}", format_host(&json.add), json.port)
        } else {
            json.ps
        };

        let mut proxy = Proxy::new(Self::PROXY_TYPE, json.add, json.port).with_name(name);
        proxy.uuid = json.id;
        proxy.alter_id = json.aid;
        proxy.cipher = if json.scy.is_empty() {
            "auto".to_string()
        } else {
            json.scy
        };
        proxy.network = if json.net.is_empty() {
            "tcp".to_string()
        } else {
            json.net
        };
        proxy.tls = json.tls == "tls";
        proxy.sni = json.sni;

        if proxy.is_ws() {
            if !json.path.is_empty() {
                proxy.ws_opts.insert("path".to_string(), json.path);
            }
            if !json.host.is_empty() {
                proxy.ws_opts.insert("host".to_string(), json.host);
            }
        }

        Ok(proxy)
    }

    fn encode(&self, proxy: &Proxy) -> Result<String> {
        let mut json = VMessJson {
            v: "2".to_string(),
            ps: proxy.name.clone(),
            add: proxy.server.clone(),
            port: proxy.port,
            id: proxy.uuid.clone(),
            aid: proxy.alter_id,
            scy: proxy.cipher.clone(),
            net: proxy.network.clone(),
            header_type: "none".to_string(),
            tls: if proxy.tls { "tls".to_string() } else { String::new() },
            sni: proxy.sni.clone(),
            ..Default::default()
        };

        if proxy.is_ws() {
            if let Some(path) = proxy.ws_opts.get("path") {
                json.path = path.clone();
            }
            if let Some(host) = proxy.ws_opts.get("host") {
                json.host = host.clone();
            }
        }

        let body = serde_json::to_string(&json)
            .with_context(|| format!("Failed to marshal VMess config for {}", proxy.name))?;
        Ok(format!("vmess://{}", encode_base64(body)))
    }
}

// ============================================================================
// Deserialization Helpers
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

/// Custom deserializer for port (handles both string and number)
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => u16::try_from(n).map_err(serde::de::Error::custom),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Custom deserializer for u32 (handles string, number and null)
fn deserialize_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => u32::try_from(n).map_err(serde::de::Error::custom),
        Some(NumberOrString::String(s)) if s.trim().is_empty() => Ok(0),
        Some(NumberOrString::String(s)) => s.trim().parse().map_err(serde::de::Error::custom),
        None => Ok(0),
    }
}

/// Custom deserializer for a string field some clients emit as a number
fn deserialize_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Ok(n.to_string()),
        Some(NumberOrString::String(s)) => Ok(s),
        None => Ok(String::new()),
    }
}
