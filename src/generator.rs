//! Pipeline orchestration
//!
//! This module drives one run from subscription sources to output files:
//! Fetching → Parsing → Testing (mode dependent) → Saving.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::encoder::{ProxyDocument, encode_uri_list};
use crate::engine::ForwardingEngine;
use crate::parser::parse_subscription;
use crate::prober::{ProbeRoute, Prober, TestMode};
use crate::proxy::{Proxy, ProxyStats};
use crate::transform::{apply_thresholds, rank_and_dedup};
use crate::webdav::{Publish, WebDavClient};

// Sub-modules
pub mod helpers;
pub mod report;
pub mod subscription;

// Re-exports
pub use helpers::{expand_tilde, fetch_text, read_source};
pub use report::ParsingLog;
pub use subscription::Subscription;

/// Stage names in the order they are reported
pub const STAGES: [&str; 4] = ["Fetching", "Parsing", "Testing", "Saving"];

/// Prints a stage line, clearing whatever the terminal line held before
pub fn report_stage(stage: &str) {
    println!("\x1b[2K\rStage: {}", stage);
    info!("Stage: {}", stage);
}

// ============================================================================
// Run Results
// ============================================================================

/// Parsed nodes of all sources together with their counters
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub nodes: Vec<Proxy>,
    pub stats: ProxyStats,
}

/// What the saving stage produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Number of nodes written
    pub kept: usize,
    pub document_path: PathBuf,
    pub document_written: bool,
    pub uri_list_written: bool,
    pub published: bool,
}

// ============================================================================
// Generator
// ============================================================================

/// Orchestrates a complete run
pub struct Generator {
    config: AppConfig,
    parsing_log: ParsingLog,
}

impl Generator {
    pub fn new(config: AppConfig) -> Self {
        let parsing_log = ParsingLog::new(config.parsing_log_path());
        Self {
            config,
            parsing_log,
        }
    }

    /// Load generator from config path or URL
    pub async fn load(path_or_url: &str) -> Result<Self> {
        let config = AppConfig::load(path_or_url).await?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Starts the forwarding engine configured for this run
    ///
    /// Must happen before anything is written, a failure here is fatal.
    pub async fn start_engine(&self) -> Result<ForwardingEngine> {
        ForwardingEngine::start(&self.config.engine).await
    }

    /// Starts the engine, then runs every stage for the chosen mode
    pub async fn run(&self, mode: TestMode) -> Result<SaveReport> {
        let engine = self.start_engine().await?;
        Ok(self.run_with_engine(mode, engine).await)
    }

    /// Runs every stage on an engine that is already up, stopping it afterwards
    ///
    /// Once the engine is ready nothing else aborts the run; failures are
    /// logged and the run continues.
    pub async fn run_with_engine(&self, mode: TestMode, mut engine: ForwardingEngine) -> SaveReport {
        info!("Starting run with {}", mode);

        report_stage("Fetching");
        let sources = self.fetch_sources().await;

        report_stage("Parsing");
        let parsed = self.parse_sources(&sources);
        self.parsing_log.write_stats(&parsed.stats);

        report_stage("Testing");
        let tested = if mode.probes() {
            self.test_nodes(parsed.nodes, mode, &engine).await
        } else {
            debug!("No test selected, keeping all {} parsed nodes", parsed.nodes.len());
            parsed.nodes
        };
        if let Err(e) = engine.stop().await {
            warn!("{:#}", e);
        }

        report_stage("Saving");
        let report = self.save(tested, mode).await;

        report_stage("Completed");
        report
    }

    /// Fetches every subscription source, skipping the ones that fail
    ///
    /// Returns `(source name, raw content)` pairs.
    pub async fn fetch_sources(&self) -> Vec<(String, String)> {
        let total = self.config.subscriptions.len();
        if total == 0 {
            warn!("No subscriptions configured");
        }

        let mut results = Vec::with_capacity(total);
        for (index, sub) in self.config.subscriptions.iter().enumerate() {
            info!(
                "Fetching subscription [{}/{}]: '{}'",
                index + 1,
                total,
                sub.display_name()
            );
            match read_source(&sub.url).await {
                Ok(content) => {
                    debug!(
                        "Received {} bytes from '{}'",
                        content.len(),
                        sub.display_name()
                    );
                    results.push((sub.display_name().to_string(), content));
                }
                Err(e) => {
                    warn!("Failed to fetch subscription '{}': {:#}", sub.display_name(), e);
                }
            }
        }

        debug!(
            "Subscription fetching complete: {}/{} source(s) successful",
            results.len(),
            total
        );
        results
    }

    /// Decodes all fetched sources into one candidate list
    pub fn parse_sources(&self, sources: &[(String, String)]) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        for (name, content) in sources {
            let nodes = parse_subscription(content, &mut outcome.stats);
            info!("Subscription '{}' returned {} nodes", name, nodes.len());
            outcome.nodes.extend(nodes);
        }

        info!(
            "Parsed {} nodes ({} failed, {} skipped lines)",
            outcome.stats.total_success, outcome.stats.total_fail, outcome.stats.skipped
        );
        for line in outcome.stats.summary_lines() {
            debug!("{}", line);
        }
        outcome
    }

    /// Probes the candidates through `route` and applies the thresholds
    pub async fn test_nodes<R: ProbeRoute>(
        &self,
        nodes: Vec<Proxy>,
        mode: TestMode,
        route: &R,
    ) -> Vec<Proxy> {
        let prober = Prober::new(self.config.probe_config(), route);
        let tested = prober.probe_all(nodes, mode).await;
        apply_thresholds(tested, mode, &self.config.thresholds())
    }

    /// Ranks the tested nodes and writes every output
    ///
    /// Each write is independent; a failure is logged and the next one runs.
    pub async fn save(&self, tested: Vec<Proxy>, mode: TestMode) -> SaveReport {
        info!("Saving results for {} tested nodes", tested.len());
        let unique = rank_and_dedup(tested, mode);

        let uri_list_path = self.config.unique_nodes_path();
        let uri_list_written =
            helpers::write_file_best_effort(&uri_list_path, &encode_uri_list(&unique)).await;
        if uri_list_written {
            info!("Saved {} unique nodes to {:?}", unique.len(), uri_list_path);
        }

        let document_path = self.config.document_path(mode);
        let document = match ProxyDocument::new(&unique).to_yaml() {
            Ok(yaml) => Some(yaml),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        };

        let mut document_written = false;
        if let Some(yaml) = &document {
            document_written = helpers::write_file_best_effort(&document_path, yaml).await;
            if document_written {
                let shown = std::path::absolute(&document_path)
                    .unwrap_or_else(|_| document_path.clone());
                println!(
                    "\n✅ Saved {} to:\n   {}\n",
                    mode.describe(unique.len()),
                    shown.display()
                );
            }
        }

        self.parsing_log.append_remaining(unique.len());

        let mut published = false;
        if let Some(yaml) = &document {
            published = self.publish(&document_path, yaml).await;
        }

        SaveReport {
            kept: unique.len(),
            document_path,
            document_written,
            uri_list_written,
            published,
        }
    }

    /// Uploads the document when remote publishing is configured
    async fn publish(&self, document_path: &Path, yaml: &str) -> bool {
        let webdav_config = self.config.get_webdav_config();
        if !webdav_config.is_configured() {
            debug!("WebDAV upload is not configured, skipping");
            return false;
        }

        let name = document_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "nodes.yaml".to_string());

        let client = match WebDavClient::new(webdav_config) {
            Ok(client) => client,
            Err(e) => {
                warn!("{:#}", e);
                return false;
            }
        };
        publish_document(&client, &name, yaml).await
    }
}

/// Publishes through any [`Publish`] implementation, logging failures
pub async fn publish_document(publisher: &dyn Publish, name: &str, document: &str) -> bool {
    match publisher.publish(name, document).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to publish {}: {:#}", name, e);
            false
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;

    use super::*;
    use crate::parser::base64::encode_base64;
    use crate::proxy::ProxyType;

    struct RecordingPublisher {
        fail: bool,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Publish for RecordingPublisher {
        async fn publish(&self, name: &str, document: &str) -> Result<()> {
            if self.fail {
                bail!("remote unavailable");
            }
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), document.to_string()));
            Ok(())
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nodesift-gen-{}-{}", tag, std::process::id()))
    }

    fn config_in(dir: &Path) -> AppConfig {
        AppConfig {
            output_dir: dir.to_string_lossy().to_string(),
            unique_nodes_file: dir.join("uniqueNodes.txt").to_string_lossy().to_string(),
            parsing_log: dir.join("parsingLog.txt").to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_sources_merges_and_counts() {
        let generator = Generator::new(AppConfig::default());
        let sources = vec![
            (
                "plain".to_string(),
                "trojan://pw@a.example.com:443#a\nvless://@bad.example.com:443#bad\n".to_string(),
            ),
            (
                "base64".to_string(),
                encode_base64("hy2://pw@b.example.com:443#b\nss://YWVzLTI1Ni1nY206cA@c.example.com:8388#c"),
            ),
        ];
        let outcome = generator.parse_sources(&sources);
        assert_eq!(outcome.nodes.len(), 3);
        assert_eq!(outcome.stats.total_success, 3);
        assert_eq!(outcome.stats.fail(ProxyType::Vless), 1);
    }

    #[tokio::test]
    async fn test_fetch_sources_skips_failures() {
        let dir = temp_dir("fetch");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let good = dir.join("good.txt");
        tokio::fs::write(&good, "trojan://pw@a.example.com:443#a\n").await.unwrap();

        let mut config = config_in(&dir);
        config.subscriptions = vec![
            Subscription::new(dir.join("missing.txt").to_string_lossy().to_string()),
            Subscription {
                name: "good".to_string(),
                url: good.to_string_lossy().to_string(),
            },
        ];
        let sources = Generator::new(config).fetch_sources().await;
        let _ = tokio::fs::remove_dir_all(&dir).await;

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].0, "good");
    }

    #[tokio::test]
    async fn test_save_writes_outputs() {
        let dir = temp_dir("save");
        let generator = Generator::new(config_in(&dir));

        let mut node = Proxy::new(ProxyType::Trojan, "a.example.com", 443).with_name("特殊 JP 01");
        node.password = "pw".to_string();
        let report = generator.save(vec![node.clone(), node], TestMode::None).await;

        assert_eq!(report.kept, 1);
        assert!(report.document_written && report.uri_list_written);
        assert!(!report.published);
        assert_eq!(report.document_path, dir.join("raw.yaml"));

        let list = tokio::fs::read_to_string(dir.join("uniqueNodes.txt")).await.unwrap();
        assert_eq!(list, "trojan://pw@a.example.com:443#JP%2001\r\n");
        let yaml = tokio::fs::read_to_string(dir.join("raw.yaml")).await.unwrap();
        assert!(yaml.contains("name: JP 01"));
        let log = tokio::fs::read_to_string(dir.join("parsingLog.txt")).await.unwrap();
        assert!(log.contains("Number of remaining nodes after removing duplicates: 1\r\n"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_save_empty_writes_placeholder() {
        let dir = temp_dir("empty");
        let generator = Generator::new(config_in(&dir));

        let mut untested = Proxy::new(ProxyType::Ss, "a.example.com", 8388).with_name("a");
        untested.cipher = "aes-256-gcm".to_string();
        let report = generator.save(vec![untested], TestMode::Speed).await;

        assert_eq!(report.kept, 0);
        let yaml = tokio::fs::read_to_string(dir.join("speed.yaml")).await.unwrap();
        assert!(yaml.contains(crate::encoder::PLACEHOLDER_NAME));
        let list = tokio::fs::read_to_string(dir.join("uniqueNodes.txt")).await.unwrap();
        assert!(list.is_empty());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_save_continues_after_failed_write() {
        let dir = temp_dir("partial");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        // A regular file where a parent directory is expected
        let blocker = dir.join("blocker");
        tokio::fs::write(&blocker, "").await.unwrap();
        let mut config = config_in(&dir);
        config.unique_nodes_file = blocker.join("uniqueNodes.txt").to_string_lossy().to_string();
        let generator = Generator::new(config);

        let mut node = Proxy::new(ProxyType::Trojan, "a.example.com", 443).with_name("a");
        node.password = "pw".to_string();
        let report = generator.save(vec![node], TestMode::None).await;

        assert!(!report.uri_list_written);
        assert!(report.document_written);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_publish_document() {
        let publisher = RecordingPublisher {
            fail: false,
            calls: Mutex::new(Vec::new()),
        };
        assert!(publish_document(&publisher, "best.yaml", "proxies: []\n").await);
        assert_eq!(
            publisher.calls.lock().unwrap()[0],
            ("best.yaml".to_string(), "proxies: []\n".to_string())
        );

        let failing = RecordingPublisher {
            fail: true,
            calls: Mutex::new(Vec::new()),
        };
        assert!(!publish_document(&failing, "best.yaml", "proxies: []\n").await);
    }

    /// Engine config whose process idles and whose API address is a live listener
    #[cfg(unix)]
    async fn idle_engine(config: &mut AppConfig) -> tokio::net::TcpListener {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        config.engine.binary = "sleep".to_string();
        config.engine.args = vec!["30".to_string()];
        config.engine.workdir = String::new();
        config.engine.api_addr = listener.local_addr().unwrap().to_string();
        listener
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_without_probing() {
        let dir = temp_dir("run");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let source = dir.join("nodes.txt");
        tokio::fs::write(&source, "trojan://pw@a.example.com:443#US\ntrojan://pw@b.example.com:443#US\n")
            .await
            .unwrap();

        let mut config = config_in(&dir);
        config.subscriptions = vec![Subscription::new(source.to_string_lossy().to_string())];
        let _api = idle_engine(&mut config).await;

        let report = Generator::new(config).run(TestMode::None).await.unwrap();
        assert_eq!(report.kept, 2);

        let list = tokio::fs::read_to_string(dir.join("uniqueNodes.txt")).await.unwrap();
        assert!(list.contains("#US\r\n"));
        assert!(list.contains("#US%20%281%29\r\n"));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_run_engine_failure_is_fatal() {
        let dir = temp_dir("fatal");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let source = dir.join("nodes.txt");
        tokio::fs::write(&source, "trojan://pw@a.example.com:443#US\n").await.unwrap();

        let mut config = config_in(&dir);
        config.subscriptions = vec![Subscription::new(source.to_string_lossy().to_string())];
        config.engine.binary = "/nonexistent/engine".to_string();
        let generator = Generator::new(config);

        for mode in [TestMode::None, TestMode::Tcp] {
            assert!(generator.run(mode).await.is_err());
            assert!(!dir.join("parsingLog.txt").exists());
            assert!(!dir.join("uniqueNodes.txt").exists());
            assert!(!dir.join(format!("{}.yaml", mode.output_stem())).exists());
        }
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
