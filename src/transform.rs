//! Ranking, deduplication and renaming
//!
//! This module turns tested candidates into the final node list:
//! - threshold policy (minimum throughput, maximum latency)
//! - throughput-first ordering with a stable name tie-break
//! - collapsing of nodes sharing one `(server, port)` endpoint
//! - display names with a throughput annotation and collision-safe numbering

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::prober::TestMode;
use crate::proxy::Proxy;

/// Promotional fragments removed from raw node names
const PROMOTIONAL_TEXT: [&str; 2] = ["CloudFlare节点", "特殊"];

// ============================================================================
// Threshold Policy
// ============================================================================

/// Acceptance limits applied to probe results
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Minimum throughput in KiB/s; slower nodes count as failed
    pub min_speed: f64,
    /// Maximum latency in milliseconds; slower nodes count as unreachable
    pub max_latency: u64,
}

/// Applies the acceptance limits for the given mode
///
/// Measurements outside the limits are zeroed. In modes that include the
/// latency test, nodes without a usable latency are dropped.
pub fn apply_thresholds(nodes: Vec<Proxy>, mode: TestMode, thresholds: &Thresholds) -> Vec<Proxy> {
    let original_count = nodes.len();
    let filtered: Vec<Proxy> = nodes
        .into_iter()
        .map(|mut node| {
            if mode.includes_speed() && node.speed < thresholds.min_speed {
                node.speed = 0.0;
            }
            if mode.includes_tcp() && node.latency > thresholds.max_latency {
                node.latency = 0;
            }
            node
        })
        .filter(|node| !mode.includes_tcp() || node.latency > 0)
        .collect();

    if mode.includes_tcp() {
        info!(
            "After latency filtering: {} of {} nodes",
            filtered.len(),
            original_count
        );
    }
    filtered
}

// ============================================================================
// Ranking
// ============================================================================

/// Orders by throughput descending, then raw name ascending
pub fn compare_rank(a: &Proxy, b: &Proxy) -> Ordering {
    b.speed
        .partial_cmp(&a.speed)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.name.cmp(&b.name))
}

/// Ranks, deduplicates and renames the tested nodes
///
/// Modes that verify throughput drop every node without a positive speed
/// first. The fastest node of each endpoint survives. The returned records
/// carry their final display name and a zeroed `speed`.
pub fn rank_and_dedup(mut nodes: Vec<Proxy>, mode: TestMode) -> Vec<Proxy> {
    if mode.includes_speed() {
        nodes.retain(|node| node.speed > 0.0);
        info!("After speed filtering: {} nodes", nodes.len());
    }

    nodes.sort_by(compare_rank);

    let mut seen: HashSet<String> = HashSet::new();
    let mut namer = Namer::default();
    let mut unique = Vec::with_capacity(nodes.len());

    for node in nodes {
        if node.server.is_empty() {
            debug!("Skipping node with empty server: {}", node.name);
            continue;
        }

        let key = node.endpoint_key();
        if !seen.insert(key.clone()) {
            debug!("Skipping duplicate node: {}", key);
            continue;
        }

        let name = namer.assign(&node.name, node.speed);
        let mut proxy = node;
        proxy.name = name;
        proxy.speed = 0.0;
        unique.push(proxy);
    }

    info!("Number of remaining nodes after removing duplicates: {}", unique.len());
    unique
}

// ============================================================================
// Naming
// ============================================================================

/// Formats the throughput annotation, e.g. `⬇️ 5.0MB/s`
pub fn format_speed(speed: f64) -> String {
    format!("⬇️ {:.1}MB/s", speed / 1024.0)
}

/// A raw node name split into its display parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName {
    /// Cleaned name without the counter token
    pub base: String,
    /// Trailing `(n)` or zero-prefixed token detached from the name
    pub counter: Option<String>,
}

impl DisplayName {
    /// Cleans a raw subscription name
    ///
    /// Keeps the text before the first `|`, removes promotional fragments and
    /// detaches a trailing counter token.
    pub fn from_raw(raw: &str) -> Self {
        let head = raw.split('|').next().unwrap_or_default().trim();

        let mut cleaned = head.to_string();
        for text in PROMOTIONAL_TEXT {
            cleaned = cleaned.replace(text, "");
        }
        let cleaned = cleaned.trim().to_string();

        let words: Vec<&str> = cleaned.split(' ').collect();
        if words.len() > 1 {
            let last = words[words.len() - 1];
            if (last.starts_with('(') && last.ends_with(')')) || last.starts_with('0') {
                return Self {
                    base: words[..words.len() - 1].join(" "),
                    counter: Some(last.to_string()),
                };
            }
        }

        Self {
            base: cleaned,
            counter: None,
        }
    }

    /// Renders the name with its own counter token
    pub fn render(&self, speed: f64) -> String {
        let mut name = self.base.clone();
        if let Some(counter) = &self.counter {
            name.push(' ');
            name.push_str(counter);
        }
        append_speed(name, speed)
    }

    /// Renders the name with a generated `(n)` suffix instead of the counter
    pub fn render_numbered(&self, n: usize, speed: f64) -> String {
        append_speed(format!("{} ({})", self.base, n), speed)
    }
}

fn append_speed(mut name: String, speed: f64) -> String {
    if speed > 0.0 {
        name.push_str(" | ");
        name.push_str(&format_speed(speed));
    }
    name
}

/// Hands out collision-free display names within one run
#[derive(Debug, Default)]
pub struct Namer {
    counts: HashMap<String, usize>,
    used: HashSet<String>,
}

impl Namer {
    /// Returns the final name for a raw name and measured speed
    ///
    /// The n-th repeat of a rendered name becomes `base (n)`. If that is taken
    /// too, the suffix keeps increasing until the name is free.
    pub fn assign(&mut self, raw: &str, speed: f64) -> String {
        let display = DisplayName::from_raw(raw);
        let rendered = display.render(speed);

        let count = self.counts.entry(rendered.clone()).or_insert(0);
        *count += 1;
        let repeats = *count - 1;

        let name = if repeats == 0 && !self.used.contains(&rendered) {
            rendered
        } else {
            let mut n = repeats.max(1);
            loop {
                let candidate = display.render_numbered(n, speed);
                if !self.used.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            }
        };

        self.used.insert(name.clone());
        name
    }
}
