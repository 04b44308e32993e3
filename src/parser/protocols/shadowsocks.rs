//! Shadowsocks protocol codec
//!
//! This module provides parsing and serialization for Shadowsocks (ss://) URIs.

use anyhow::{Result, anyhow, bail};
use tracing::trace;

use crate::parser::base64::{decode_base64_str, encode_base64};
use crate::proxy::{Proxy, ProxyType};

use super::{ProtocolCodec, format_host, parse_host_port, percent_decode};

// ============================================================================
// Shadowsocks Codec
// ============================================================================

/// Codec for Shadowsocks (ss://) URIs
///
/// Accepted forms:
/// - SIP002: ss://BASE64(method:password)@host:port#tag
/// - SIP002 with plain userinfo: ss://method:password@host:port#tag
/// - SIP002 with plugin suffix: ss://userinfo@host:port/?plugin=...#tag (plugin ignored)
/// - Legacy: ss://BASE64(method:password@host:port)#tag
///
/// Encoding always produces the first form.
pub struct ShadowsocksCodec;

impl ProtocolCodec for ShadowsocksCodec {
    const PROXY_TYPE: ProxyType = ProxyType::Ss;

    fn decode(&self, uri: &str) -> Result<Proxy> {
        let uri = uri.trim();
        trace!("Parsing Shadowsocks URI");

        let without_scheme = uri
            .strip_prefix("ss://")
            .ok_or_else(|| anyhow!("Invalid Shadowsocks URI: missing ss:// prefix"))?;

        let (main_part, tag) = match without_scheme.rfind('#') {
            Some(pos) => (
                &without_scheme[..pos],
                Some(percent_decode(&without_scheme[pos + 1..])),
            ),
            None => (without_scheme, None),
        };

        let (cipher, password, server, port) = match main_part.rfind('@') {
            Some(at_pos) => {
                trace!("Parsing as SIP002 format (found @ separator)");
                let (cipher, password) = parse_userinfo(&main_part[..at_pos])?;
                let (server, port) = parse_endpoint(&main_part[at_pos + 1..])?;
                (cipher, password, server, port)
            }
            None => {
                trace!("Parsing as legacy Base64 format");
                parse_legacy(main_part)?
            }
        };

        if cipher.is_empty() {
            bail!("Shadowsocks URI missing cipher");
        }

        let name = tag.unwrap_or_else(|| format!("{}:{}", format_host(&server), port));
        let mut proxy = Proxy::new(Self::PROXY_TYPE, server, port).with_name(name);
        proxy.cipher = cipher;
        proxy.password = password;
        Ok(proxy)
    }

    fn encode(&self, proxy: &Proxy) -> Result<String> {
        let auth = encode_base64(format!("{}:{}", proxy.cipher, proxy.password));
        Ok(format!(
            "ss://{}@{}:{}#{}",
            auth,
            format_host(&proxy.server),
            proxy.port,
            urlencoding::encode(&proxy.name)
        ))
    }
}

/// Parses `host:port`, dropping a trailing `/?plugin=...` section
fn parse_endpoint(hostport_and_query: &str) -> Result<(String, u16)> {
    let hostport = match hostport_and_query.find('?') {
        Some(q_pos) => &hostport_and_query[..q_pos],
        None => hostport_and_query,
    };
    parse_host_port(hostport.trim_end_matches('/'))
}

/// Parses userinfo which can be Base64(method:password) or method:password
///
/// The userinfo is percent-decoded first, since SIP002 links often escape the
/// Base64 padding as `%3D`.
fn parse_userinfo(userinfo: &str) -> Result<(String, String)> {
    let unescaped = percent_decode(userinfo);
    if let Ok(decoded) = decode_base64_str(&unescaped)
        && let Some((method, password)) = decoded.split_once(':')
    {
        return Ok((method.to_string(), password.to_string()));
    }

    let (method, password) = unescaped
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid Shadowsocks userinfo format"))?;
    Ok((method.to_string(), password.to_string()))
}

/// Parses legacy format: BASE64(method:password@host:port)
fn parse_legacy(main_part: &str) -> Result<(String, String, String, u16)> {
    let decoded = decode_base64_str(main_part)
        .map_err(|e| anyhow!("Failed to decode legacy Shadowsocks URI: {}", e))?;

    let (userinfo, hostport) = decoded
        .rsplit_once('@')
        .ok_or_else(|| anyhow!("Invalid legacy Shadowsocks format: missing @"))?;

    let (method, password) = userinfo.split_once(':').ok_or_else(|| {
        anyhow!("Invalid Shadowsocks userinfo: missing method:password separator")
    })?;

    let (server, port) = parse_host_port(hostport)?;
    Ok((method.to_string(), password.to_string(), server, port))
}
