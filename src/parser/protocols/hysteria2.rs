//! Hysteria2 protocol codec
//!
//! Format: hysteria2://auth@host:port?params#tag (the `hy2://` alias is
//! accepted on input, output always uses `hysteria2://`).

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::trace;

use crate::proxy::{Proxy, ProxyType};

use super::{AuthorityUri, ProtocolCodec, build_authority_uri, is_truthy};

// ============================================================================
// Hysteria2 Codec
// ============================================================================

/// Codec for Hysteria2 (hysteria2:// or hy2://) URIs
pub struct Hysteria2Codec;

impl ProtocolCodec for Hysteria2Codec {
    const PROXY_TYPE: ProxyType = ProxyType::Hysteria2;

    fn decode(&self, uri: &str) -> Result<Proxy> {
        trace!("Parsing Hysteria2 URI");
        let parsed = AuthorityUri::parse(uri, "Hysteria2")?;
        let params = &parsed.params;

        let mut proxy =
            Proxy::new(Self::PROXY_TYPE, parsed.server, parsed.port).with_name(parsed.name);
        proxy.password = parsed.user;
        proxy.sni = params.get("sni").cloned().unwrap_or_default();
        proxy.skip_cert_verify =
            is_truthy(params.get("insecure")) || is_truthy(params.get("allowInsecure"));
        proxy.obfs = params
            .get("obfs")
            .filter(|o| o.as_str() != "none")
            .cloned()
            .unwrap_or_default();
        proxy.obfs_password = params.get("obfs-password").cloned().unwrap_or_default();
        Ok(proxy)
    }

    fn encode(&self, proxy: &Proxy) -> Result<String> {
        let mut query = BTreeMap::new();
        if !proxy.sni.is_empty() {
            query.insert("sni", proxy.sni.clone());
        }
        if proxy.skip_cert_verify {
            query.insert("insecure", "1".to_string());
        }
        if !proxy.obfs.is_empty() {
            query.insert("obfs", proxy.obfs.clone());
        }
        if !proxy.obfs_password.is_empty() {
            query.insert("obfs-password", proxy.obfs_password.clone());
        }
        Ok(build_authority_uri(
            "hysteria2",
            &proxy.password,
            proxy,
            &query,
        ))
    }
}
