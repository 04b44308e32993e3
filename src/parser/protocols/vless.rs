//! VLESS protocol codec
//!
//! Format: vless://uuid@host:port?params#tag

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use tracing::trace;

use crate::proxy::{Proxy, ProxyType};

use super::{AuthorityUri, ProtocolCodec, build_authority_uri, is_truthy};

// ============================================================================
// VLESS Codec
// ============================================================================

/// Codec for VLESS (vless://) URIs
pub struct VLessCodec;

impl ProtocolCodec for VLessCodec {
    const PROXY_TYPE: ProxyType = ProxyType::Vless;

    fn decode(&self, uri: &str) -> Result<Proxy> {
        trace!("Parsing VLESS URI");
        let parsed = AuthorityUri::parse(uri, "VLESS")?;

        if parsed.user.is_empty() {
            bail!("VLESS URI missing UUID");
        }

        let params = &parsed.params;
        let mut proxy =
            Proxy::new(Self::PROXY_TYPE, parsed.server, parsed.port).with_name(parsed.name);
        proxy.uuid = parsed.user;
        proxy.sni = params.get("sni").cloned().unwrap_or_default();
        proxy.skip_cert_verify =
            is_truthy(params.get("allowInsecure")) || is_truthy(params.get("insecure"));
        proxy.network = params.get("type").cloned().unwrap_or_default();
        proxy.tls = params.get("security").is_some_and(|s| s == "tls");

        if proxy.is_ws() {
            for key in ["path", "host"] {
                if let Some(value) = params.get(key)
                    && !value.is_empty()
                {
                    proxy.ws_opts.insert(key.to_string(), value.clone());
                }
            }
        }

        Ok(proxy)
    }

    fn encode(&self, proxy: &Proxy) -> Result<String> {
        let mut query = BTreeMap::new();
        if !proxy.sni.is_empty() {
            query.insert("sni", proxy.sni.clone());
        }
        if proxy.skip_cert_verify {
            query.insert("allowInsecure", "1".to_string());
        }
        if !proxy.network.is_empty() {
            query.insert("type", proxy.network.clone());
        }
        if proxy.tls {
            query.insert("security", "tls".to_string());
        }
        if proxy.is_ws() {
            if let Some(path) = proxy.ws_opts.get("path") {
                query.insert("path", path.clone());
            }
            if let Some(host) = proxy.ws_opts.get("host") {
                query.insert("host", host.clone());
            }
        }
        Ok(build_authority_uri("vless", &proxy.uuid, proxy, &query))
    }
}
