//! Output encoding
//!
//! Survivors of the ranker are written in two shapes:
//! - a CRLF-terminated list of scheme-exact URIs
//! - a structured `{proxies: [...]}` YAML document

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::parser::encode_uri;
use crate::proxy::Proxy;

/// Name of the single entry written when no node survived
pub const PLACEHOLDER_NAME: &str = "No usable nodes | ⬇️ 0.0MB/s";

// ============================================================================
// URI List
// ============================================================================

/// Encodes every node to its URI, one per CRLF-terminated line
///
/// Nodes that fail to encode are logged and left out.
pub fn encode_uri_list(nodes: &[Proxy]) -> String {
    let mut output = String::new();
    for node in nodes {
        match encode_uri(node) {
            Ok(uri) => {
                output.push_str(&uri);
                output.push_str("\r\n");
            }
            Err(e) => warn!("Failed to encode {} node '{}': {:#}", node.proxy_type, node.name, e),
        }
    }
    debug!("Encoded {} URI line(s)", output.matches("\r\n").count());
    output
}

// ============================================================================
// Structured Document
// ============================================================================

/// A single entry of the `proxies` list
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DocumentEntry<'a> {
    Node(&'a Proxy),
    Placeholder { name: &'static str },
}

/// The structured output document
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProxyDocument<'a> {
    pub proxies: Vec<DocumentEntry<'a>>,
}

impl<'a> ProxyDocument<'a> {
    /// Builds the document, substituting the placeholder for an empty list
    pub fn new(nodes: &'a [Proxy]) -> Self {
        let proxies = if nodes.is_empty() {
            vec![DocumentEntry::Placeholder {
                name: PLACEHOLDER_NAME,
            }]
        } else {
            nodes.iter().map(DocumentEntry::Node).collect()
        };
        Self { proxies }
    }

    /// Serializes the document as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize proxy document to YAML")
    }
}
