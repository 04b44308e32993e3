//! Reachability and throughput probing
//!
//! Candidates are tested through a [`ProbeRoute`], normally the local
//! forwarding engine, by a bounded pool of concurrent probes:
//! - latency: timed GET of the TCP test URL until a success status
//! - throughput: timed download of the reference payload in KiB/s
//!
//! Probes never drop a candidate. A failed or timed-out probe leaves a zero.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::proxy::Proxy;

// ============================================================================
// Test Mode
// ============================================================================

/// Which probes run for each candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestMode {
    /// No probing, every parsed node is kept
    #[default]
    None,
    /// Latency probe only
    Tcp,
    /// Throughput probe only
    Speed,
    /// Latency probe followed by the throughput probe
    Both,
}

impl TestMode {
    /// Resolves a prompt answer (`0`-`3`)
    pub fn from_choice(choice: &str) -> Option<Self> {
        match choice.trim() {
            "0" => Some(TestMode::None),
            "1" => Some(TestMode::Tcp),
            "2" => Some(TestMode::Speed),
            "3" => Some(TestMode::Both),
            _ => None,
        }
    }

    /// File stem of the structured document written for this mode
    pub fn output_stem(self) -> &'static str {
        match self {
            TestMode::None => "raw",
            TestMode::Tcp => "tcp",
            TestMode::Speed => "speed",
            TestMode::Both => "best",
        }
    }

    /// Summary line shown after the document is saved
    pub fn describe(self, count: usize) -> String {
        let what = match self {
            TestMode::None => "Raw nodes (no test)",
            TestMode::Tcp => "TCP test passed nodes",
            TestMode::Speed => "Speed test passed nodes",
            TestMode::Both => "Both TCP and speed tests passed nodes",
        };
        format!("{} - {} nodes", what, count)
    }

    pub fn includes_tcp(self) -> bool {
        matches!(self, TestMode::Tcp | TestMode::Both)
    }

    pub fn includes_speed(self) -> bool {
        matches!(self, TestMode::Speed | TestMode::Both)
    }

    /// Whether any probe runs, and so whether the engine is needed
    pub fn probes(self) -> bool {
        self != TestMode::None
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestMode::None => "no test",
            TestMode::Tcp => "TCP test",
            TestMode::Speed => "download speed test",
            TestMode::Both => "TCP and download speed test",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Probe Routing
// ============================================================================

/// Provides an HTTP client whose traffic reaches the internet via one candidate
pub trait ProbeRoute: Send + Sync {
    fn client_for(&self, proxy: &Proxy) -> Result<Client>;
}

// ============================================================================
// Prober
// ============================================================================

/// Probe settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Maximum number of probes in flight
    pub concurrency: usize,
    /// Deadline for each individual probe
    pub timeout: Duration,
    pub tcp_test_url: String,
    pub speed_test_url: String,
}

/// Bounded-concurrency prober
pub struct Prober<'a, R: ProbeRoute> {
    config: ProbeConfig,
    route: &'a R,
}

impl<'a, R: ProbeRoute> Prober<'a, R> {
    pub fn new(config: ProbeConfig, route: &'a R) -> Self {
        Self { config, route }
    }

    /// Probes every candidate and returns all of them with measurements set
    ///
    /// Completion order is unspecified.
    pub async fn probe_all(&self, nodes: Vec<Proxy>, mode: TestMode) -> Vec<Proxy> {
        if !mode.probes() {
            return nodes;
        }

        let total = nodes.len();
        let completed = AtomicUsize::new(0);
        let concurrency = self.config.concurrency.max(1);
        info!(
            "Running {} on {} node(s) with concurrency {}",
            mode, total, concurrency
        );

        let tested: Vec<Proxy> = stream::iter(nodes)
            .map(|node| {
                let completed = &completed;
                async move {
                    let node = self.probe_one(node, mode).await;
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(
                        "[{}/{}] {} latency={}ms speed={:.1}KiB/s",
                        done,
                        total,
                        node.endpoint_key(),
                        node.latency,
                        node.speed
                    );
                    node
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let reachable = tested.iter().filter(|n| n.latency > 0).count();
        let measured = tested.iter().filter(|n| n.speed > 0.0).count();
        info!(
            "Probing complete: {} reachable, {} with measured throughput",
            reachable, measured
        );
        tested
    }

    /// Runs the probes selected by `mode` against one candidate
    ///
    /// Both probes share a single deadline of `timeout`, so one candidate
    /// never holds a pool slot longer than that.
    pub async fn probe_one(&self, mut node: Proxy, mode: TestMode) -> Proxy {
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        let client = match self.route.client_for(&node) {
            Ok(client) => client,
            Err(e) => {
                debug!("No route for {}: {:#}", node.endpoint_key(), e);
                return node;
            }
        };

        if mode.includes_tcp() {
            node.latency = match self.measure_latency(&client, deadline).await {
                Ok(latency) => latency,
                Err(e) => {
                    trace!("Latency probe failed for {}: {:#}", node.endpoint_key(), e);
                    0
                }
            };
            if node.latency == 0 {
                return node;
            }
        }

        if mode.includes_speed() {
            node.speed = match self.measure_speed(&client, deadline).await {
                Ok(speed) => speed,
                Err(e) => {
                    trace!("Speed probe failed for {}: {:#}", node.endpoint_key(), e);
                    0.0
                }
            };
        }

        node
    }

    /// Milliseconds until the TCP test URL answers with a success status
    async fn measure_latency(&self, client: &Client, deadline: tokio::time::Instant) -> Result<u64> {
        let start = Instant::now();
        let request = client.get(&self.config.tcp_test_url).send();
        let response = tokio::time::timeout_at(deadline, request)
            .await
            .map_err(|_| anyhow!("Latency probe timed out after {:?}", self.config.timeout))??;

        let status = response.status();
        if !status.is_success() {
            bail!("TCP test URL returned status {}", status);
        }

        // Zero means "failed", so a sub-millisecond answer still counts as 1
        let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(elapsed.max(1))
    }

    /// Downloads the reference payload and returns the throughput in KiB/s
    async fn measure_speed(&self, client: &Client, deadline: tokio::time::Instant) -> Result<f64> {
        let start = Instant::now();
        let download = async {
            let mut response = client.get(&self.config.speed_test_url).send().await?;
            let status = response.status();
            if !status.is_success() {
                bail!("Speed test URL returned status {}", status);
            }
            let mut received: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                received += chunk.len() as u64;
            }
            Ok(received)
        };

        let received = tokio::time::timeout_at(deadline, download)
            .await
            .map_err(|_| anyhow!("Speed probe ran out of its {:?} budget", self.config.timeout))??;

        let seconds = start.elapsed().as_secs_f64();
        if received == 0 || seconds <= 0.0 {
            return Ok(0.0);
        }
        Ok(received as f64 / seconds / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyType;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Routes directly, without any proxy
    struct DirectRoute;

    impl ProbeRoute for DirectRoute {
        fn client_for(&self, _proxy: &Proxy) -> Result<Client> {
            Ok(Client::builder().no_proxy().build()?)
        }
    }

    /// Refuses to route candidates on port 1
    struct SelectiveRoute;

    impl ProbeRoute for SelectiveRoute {
        fn client_for(&self, proxy: &Proxy) -> Result<Client> {
            if proxy.port == 1 {
                bail!("no outbound for {}", proxy.endpoint_key());
            }
            Ok(Client::builder().no_proxy().build()?)
        }
    }

    /// Serves `body` with `status` to every connection, returns the base URL
    async fn spawn_http_server(status: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    /// Accepts connections and never answers
    async fn spawn_silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    fn config(base: &str, timeout: Duration) -> ProbeConfig {
        ProbeConfig {
            concurrency: 2,
            timeout,
            tcp_test_url: format!("{}/success.html", base),
            speed_test_url: format!("{}/__down", base),
        }
    }

    fn candidates(count: u16) -> Vec<Proxy> {
        (0..count)
            .map(|i| Proxy::new(ProxyType::Ss, format!("node{}.example.com", i), 8000 + i))
            .collect()
    }

    #[test]
    fn test_mode_from_choice() {
        assert_eq!(TestMode::from_choice("0"), Some(TestMode::None));
        assert_eq!(TestMode::from_choice(" 3\n"), Some(TestMode::Both));
        assert_eq!(TestMode::from_choice("4"), None);
        assert_eq!(TestMode::from_choice(""), None);
    }

    #[test]
    fn test_mode_flags() {
        assert!(!TestMode::None.probes());
        assert!(TestMode::Tcp.includes_tcp() && !TestMode::Tcp.includes_speed());
        assert!(TestMode::Speed.includes_speed() && !TestMode::Speed.includes_tcp());
        assert!(TestMode::Both.includes_tcp() && TestMode::Both.includes_speed());
    }

    #[test]
    fn test_mode_output_stem() {
        let stems: Vec<&str> = [TestMode::None, TestMode::Tcp, TestMode::Speed, TestMode::Both]
            .iter()
            .map(|m| m.output_stem())
            .collect();
        assert_eq!(stems, vec!["raw", "tcp", "speed", "best"]);
        assert_eq!(TestMode::Speed.describe(3), "Speed test passed nodes - 3 nodes");
    }

    #[tokio::test]
    async fn test_none_mode_returns_input() {
        let prober = Prober::new(config("http://127.0.0.1:9", Duration::from_millis(10)), &DirectRoute);
        let out = prober.probe_all(candidates(3), TestMode::None).await;
        assert_eq!(out, candidates(3));
    }

    #[tokio::test]
    async fn test_latency_and_speed_measured() {
        let base = spawn_http_server("200 OK", vec![7u8; 64 * 1024]).await;
        let prober = Prober::new(config(&base, Duration::from_secs(5)), &DirectRoute);
        let out = prober.probe_all(candidates(4), TestMode::Both).await;

        assert_eq!(out.len(), 4);
        for node in &out {
            assert!(node.latency > 0);
            assert!(node.speed > 0.0);
        }
    }

    #[tokio::test]
    async fn test_error_status_zeroes_metrics() {
        let base = spawn_http_server("503 Service Unavailable", Vec::new()).await;
        let prober = Prober::new(config(&base, Duration::from_secs(5)), &DirectRoute);

        let out = prober.probe_all(candidates(2), TestMode::Tcp).await;
        assert!(out.iter().all(|n| n.latency == 0));

        let out = prober.probe_all(candidates(2), TestMode::Speed).await;
        assert!(out.iter().all(|n| n.speed == 0.0));
    }

    #[tokio::test]
    async fn test_timeout_keeps_candidate() {
        let base = spawn_silent_server().await;
        let prober = Prober::new(config(&base, Duration::from_millis(200)), &DirectRoute);

        let start = Instant::now();
        let out = prober.probe_all(candidates(4), TestMode::Both).await;
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|n| n.latency == 0 && n.speed == 0.0));
        // Two waves of two probes, each bounded by the deadline
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_both_probes_share_one_deadline() {
        // Latency answers late, the payload never arrives
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if String::from_utf8_lossy(&buf[..n]).contains("/success.html") {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        let _ = socket
                            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                            .await;
                    });
                } else {
                    held.push(socket);
                }
            }
        });

        let timeout = Duration::from_millis(500);
        let prober = Prober::new(config(&format!("http://{}", addr), timeout), &DirectRoute);
        let start = Instant::now();
        let node = prober.probe_one(candidates(1).remove(0), TestMode::Both).await;
        let elapsed = start.elapsed();

        assert!(node.latency >= 300);
        assert_eq!(node.speed, 0.0);
        assert!(elapsed < Duration::from_millis(750), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_unroutable_candidate_kept() {
        let base = spawn_http_server("200 OK", b"ok".to_vec()).await;
        let prober = Prober::new(config(&base, Duration::from_secs(5)), &SelectiveRoute);

        let nodes = vec![
            Proxy::new(ProxyType::Trojan, "a.example.com", 1),
            Proxy::new(ProxyType::Trojan, "b.example.com", 443),
        ];
        let out = prober.probe_all(nodes, TestMode::Tcp).await;
        assert_eq!(out.len(), 2);
        let unroutable = out.iter().find(|n| n.port == 1).unwrap();
        assert_eq!(unroutable.latency, 0);
        let routed = out.iter().find(|n| n.port == 443).unwrap();
        assert!(routed.latency > 0);
    }

    #[tokio::test]
    async fn test_concurrency_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // (in flight, peak) as observed by the server
        let counters = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
        let server_counters = counters.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counters = server_counters.clone();
                tokio::spawn(async move {
                    let now = counters.0.fetch_add(1, Ordering::SeqCst) + 1;
                    counters.1.fetch_max(now, Ordering::SeqCst);
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    counters.0.fetch_sub(1, Ordering::SeqCst);
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                });
            }
        });

        let prober = Prober::new(
            config(&format!("http://{}", addr), Duration::from_secs(5)),
            &DirectRoute,
        );
        let out = prober.probe_all(candidates(8), TestMode::Tcp).await;
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|n| n.latency > 0));
        assert!(counters.1.load(Ordering::SeqCst) <= 2);
    }
}
