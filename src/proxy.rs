//! Canonical proxy record
//!
//! Every supported subscription scheme is decoded into a single [`Proxy`]
//! shape. The prober writes measurements onto it, the ranker renames it and the
//! encoder turns it back into a scheme URI or a document entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Proxy Type
// ============================================================================

/// Supported proxy schemes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Ss,
    Vmess,
    Trojan,
    Vless,
    Hysteria2,
}

impl ProxyType {
    /// All supported types, in the order they are reported in logs
    pub const ALL: [ProxyType; 5] = [
        ProxyType::Ss,
        ProxyType::Vmess,
        ProxyType::Trojan,
        ProxyType::Hysteria2,
        ProxyType::Vless,
    ];

    /// Canonical URI scheme (without `://`)
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyType::Ss => "ss",
            ProxyType::Vmess => "vmess",
            ProxyType::Trojan => "trojan",
            ProxyType::Vless => "vless",
            ProxyType::Hysteria2 => "hysteria2",
        }
    }

    /// Human readable label used in the parsing log
    pub fn label(self) -> &'static str {
        match self {
            ProxyType::Ss => "SS",
            ProxyType::Vmess => "VMess",
            ProxyType::Trojan => "Trojan",
            ProxyType::Vless => "VLess",
            ProxyType::Hysteria2 => "Hysteria2",
        }
    }

    /// Resolves a URI scheme, accepting the `hy2` alias
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "ss" => Some(ProxyType::Ss),
            "vmess" => Some(ProxyType::Vmess),
            "trojan" => Some(ProxyType::Trojan),
            "vless" => Some(ProxyType::Vless),
            "hysteria2" | "hy2" => Some(ProxyType::Hysteria2),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            ProxyType::Ss => 0,
            ProxyType::Vmess => 1,
            ProxyType::Trojan => 2,
            ProxyType::Vless => 3,
            ProxyType::Hysteria2 => 4,
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

// ============================================================================
// Proxy
// ============================================================================

/// Scheme-independent proxy node
///
/// Field names follow the Clash proxy list convention so the structured output
/// document can be consumed directly. Measurement fields are never serialized.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Proxy {
    pub name: String,

    pub server: String,

    pub port: u16,

    #[serde(rename = "type")]
    pub proxy_type: ProxyType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cipher: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default, rename = "alterId", skip_serializing_if = "is_zero")]
    pub alter_id: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub tls: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sni: String,

    #[serde(default, rename = "skip-cert-verify", skip_serializing_if = "is_false")]
    pub skip_cert_verify: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub obfs: String,

    #[serde(default, rename = "obfs-password", skip_serializing_if = "String::is_empty")]
    pub obfs_password: String,

    /// WebSocket transport options (`path`, `host`)
    #[serde(default, rename = "ws-opts", skip_serializing_if = "BTreeMap::is_empty")]
    pub ws_opts: BTreeMap<String, String>,

    /// Observed throughput in KiB/s, 0 when untested or failed
    #[serde(skip)]
    pub speed: f64,

    /// Observed latency in milliseconds, 0 when untested or failed
    #[serde(skip)]
    pub latency: u64,
}

impl Proxy {
    /// Creates a record with identity fields set and everything else empty
    pub fn new(proxy_type: ProxyType, server: impl Into<String>, port: u16) -> Self {
        Self {
            name: String::new(),
            server: server.into(),
            port,
            proxy_type,
            uuid: String::new(),
            cipher: String::new(),
            password: String::new(),
            alter_id: 0,
            network: String::new(),
            tls: false,
            sni: String::new(),
            skip_cert_verify: false,
            obfs: String::new(),
            obfs_password: String::new(),
            ws_opts: BTreeMap::new(),
            speed: 0.0,
            latency: 0,
        }
    }

    /// Builder-style name setter
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Network identity used for deduplication and probe routing
    pub fn endpoint_key(&self) -> String {
        if self.server.contains(':') {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }

    /// Whether the transport is WebSocket
    pub fn is_ws(&self) -> bool {
        self.network == "ws"
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

// ============================================================================
// Parse Statistics
// ============================================================================

/// Per-scheme decode counters, filled once while parsing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub total_success: u32,
    pub total_fail: u32,
    /// Lines that were not a supported proxy URI at all
    pub skipped: u32,
    success: [u32; 5],
    fail: [u32; 5],
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, proxy_type: ProxyType) {
        self.total_success += 1;
        self.success[proxy_type.index()] += 1;
    }

    pub fn record_failure(&mut self, proxy_type: ProxyType) {
        self.total_fail += 1;
        self.fail[proxy_type.index()] += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn success(&self, proxy_type: ProxyType) -> u32 {
        self.success[proxy_type.index()]
    }

    pub fn fail(&self, proxy_type: ProxyType) -> u32 {
        self.fail[proxy_type.index()]
    }

    /// Lines in the order they are written to the parsing log
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Total Success: {}", self.total_success),
            format!("Total Fail: {}", self.total_fail),
        ];
        for proxy_type in ProxyType::ALL {
            lines.push(format!(
                "{label} Success: {}, {label} Fail: {}",
                self.success(proxy_type),
                self.fail(proxy_type),
                label = proxy_type.label()
            ));
        }
        lines
    }
}
