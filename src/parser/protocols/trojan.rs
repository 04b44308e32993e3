//! Trojan protocol codec
//!
//! Format: trojan://password@host:port?params#tag

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use tracing::trace;

use crate::proxy::{Proxy, ProxyType};

use super::{AuthorityUri, ProtocolCodec, build_authority_uri, is_truthy};

// ============================================================================
// Trojan Codec
// ============================================================================

/// Codec for Trojan (trojan://) URIs
pub struct TrojanCodec;

impl ProtocolCodec for TrojanCodec {
    const PROXY_TYPE: ProxyType = ProxyType::Trojan;

    fn decode(&self, uri: &str) -> Result<Proxy> {
        trace!("Parsing Trojan URI");
        let parsed = AuthorityUri::parse(uri, "Trojan")?;

        if parsed.user.is_empty() {
            bail!("Trojan URI missing password");
        }

        let mut proxy =
            Proxy::new(Self::PROXY_TYPE, parsed.server, parsed.port).with_name(parsed.name);
        proxy.password = parsed.user;
        proxy.sni = parsed.params.get("sni").cloned().unwrap_or_default();
        proxy.skip_cert_verify = is_truthy(parsed.params.get("allowInsecure"))
            || is_truthy(parsed.params.get("insecure"));
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
        Ok(build_authority_uri("trojan", &proxy.password, proxy, &query))
    }
}
