//! End-to-end tests for the parse → probe → rank → encode pipeline.
//!
//! Probing runs against local HTTP servers through a direct route, so no
//! forwarding engine is needed.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use nodesift::config::AppConfig;
use nodesift::encoder::{PLACEHOLDER_NAME, ProxyDocument, encode_uri_list};
use nodesift::generator::Generator;
use nodesift::parser::base64::encode_base64;
use nodesift::parser::{encode_uri, parse_proxy_uri, parse_subscription};
use nodesift::prober::{ProbeRoute, TestMode};
use nodesift::proxy::{Proxy, ProxyStats, ProxyType};
use nodesift::transform::rank_and_dedup;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct DirectRoute;

impl ProbeRoute for DirectRoute {
    fn client_for(&self, _proxy: &Proxy) -> Result<Client> {
        Ok(Client::builder().no_proxy().build()?)
    }
}

fn node(name: &str, server: &str, port: u16, speed: f64) -> Proxy {
    let mut proxy = Proxy::new(ProxyType::Ss, server, port).with_name(name);
    proxy.cipher = "aes-256-gcm".to_string();
    proxy.password = "secret".to_string();
    proxy.speed = speed;
    proxy
}

fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("nodesift-it-{}-{}", tag, std::process::id()))
}

async fn spawn_http_server(body_len: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body_len
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&vec![b'x'; body_len]).await;
            });
        }
    });
    format!("http://{}", addr)
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn test_round_trip_every_scheme() {
    let mut ss = Proxy::new(ProxyType::Ss, "ss.example.com", 8388).with_name("SS | 1");
    ss.cipher = "chacha20-ietf-poly1305".to_string();
    ss.password = "p@ss:word".to_string();

    let mut vmess = Proxy::new(ProxyType::Vmess, "vm.example.com", 443).with_name("VM 01");
    vmess.uuid = "b831381d-6324-4d53-ad4f-8cda48b30811".to_string();
    vmess.cipher = "auto".to_string();
    vmess.alter_id = 2;
    vmess.network = "ws".to_string();
    vmess.tls = true;
    vmess.sni = "vm.example.com".to_string();
    vmess.ws_opts.insert("path".to_string(), "/ray".to_string());
    vmess.ws_opts.insert("host".to_string(), "cdn.example.com".to_string());

    let mut trojan = Proxy::new(ProxyType::Trojan, "2001:db8::1", 443).with_name("v6");
    trojan.password = "pw".to_string();
    trojan.skip_cert_verify = true;

    let mut vless = Proxy::new(ProxyType::Vless, "vl.example.com", 443).with_name("VL (2)");
    vless.uuid = "uuid".to_string();
    vless.network = "tcp".to_string();
    vless.tls = true;
    vless.sni = "sni.example.com".to_string();

    let mut hy2 = Proxy::new(ProxyType::Hysteria2, "hy.example.com", 8443).with_name("HY");
    hy2.password = "pw".to_string();
    hy2.obfs = "salamander".to_string();
    hy2.obfs_password = "obfs pw".to_string();

    for original in [ss, vmess, trojan, vless, hy2] {
        let uri = encode_uri(&original).unwrap();
        let decoded = parse_proxy_uri(&uri).unwrap();
        assert_eq!(decoded, original, "round trip of {}", uri);
    }
}

#[test]
fn test_subscription_to_uri_list() {
    let plain = "\
ss://YWVzLTI1Ni1nY206c2VjcmV0@a.example.com:8388#A
trojan://pw@b.example.com:443?sni=b.example.com#B
";
    let mut stats = ProxyStats::new();
    let nodes = parse_subscription(&encode_base64(plain), &mut stats);
    assert_eq!(stats.total_success, 2);

    let list = encode_uri_list(&nodes);
    assert_eq!(
        list,
        "ss://YWVzLTI1Ni1nY206c2VjcmV0@a.example.com:8388#A\r\n\
         trojan://pw@b.example.com:443?sni=b.example.com#B\r\n"
    );
}

// ============================================================================
// Ranking Scenarios
// ============================================================================

#[test]
fn test_same_endpoint_keeps_fastest() {
    let nodes = vec![
        node("first", "example.com", 8388, 4096.0),
        node("second", "example.com", 8388, 8192.0),
    ];
    let out = rank_and_dedup(nodes, TestMode::Speed);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].name, "second | ⬇️ 8.0MB/s");
}

#[test]
fn test_promotional_name_rewrite() {
    let out = rank_and_dedup(
        vec![node("CloudFlare节点 US (2)", "us.example.com", 443, 5120.0)],
        TestMode::Both,
    );
    assert_eq!(out[0].name, "US (2) | ⬇️ 5.0MB/s");
    assert_eq!(out[0].speed, 0.0);
}

#[test]
fn test_colliding_names_numbered() {
    let out = rank_and_dedup(
        vec![node("US", "a.example.com", 1, 0.0), node("US", "b.example.com", 1, 0.0)],
        TestMode::None,
    );
    let names: Vec<&str> = out.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["US", "US (1)"]);
}

#[test]
fn test_speed_mode_filters_failed() {
    let out = rank_and_dedup(
        vec![node("dead", "a.example.com", 1, 0.0), node("alive", "b.example.com", 1, 100.0)],
        TestMode::Speed,
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].name, "alive | ⬇️ 0.1MB/s");
}

#[test]
fn test_nothing_survives_placeholder() {
    let out = rank_and_dedup(vec![node("dead", "a.example.com", 1, 0.0)], TestMode::Both);
    assert!(out.is_empty());

    let yaml = ProxyDocument::new(&out).to_yaml().unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    let proxies = value["proxies"].as_sequence().unwrap();
    assert_eq!(proxies.len(), 1);
    assert_eq!(proxies[0]["name"].as_str(), Some(PLACEHOLDER_NAME));
}

#[test]
fn test_output_invariants_on_larger_input() {
    let mut nodes = Vec::new();
    for i in 0..40u16 {
        let name = match i % 4 {
            0 => "HK",
            1 => "HK 01",
            2 => "特殊 HK (1)",
            _ => "HK | promo",
        };
        nodes.push(node(name, &format!("h{}.example.com", i % 25), 443, f64::from(i % 7) * 300.0));
    }

    let out = rank_and_dedup(nodes, TestMode::None);
    let endpoints: HashSet<String> = out.iter().map(Proxy::endpoint_key).collect();
    let names: HashSet<&str> = out.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(out.len(), 25);
    assert_eq!(endpoints.len(), out.len());
    assert_eq!(names.len(), out.len());
    assert!(out.iter().all(|p| p.speed == 0.0));
}

// ============================================================================
// Full Pipeline
// ============================================================================

#[tokio::test]
async fn test_probe_and_save_best_mode() {
    let base = spawn_http_server(256 * 1024).await;
    let dir = temp_dir("best");
    let config = AppConfig {
        tcp_test_url: format!("{}/success.html", base),
        speed_test_url: format!("{}/__down", base),
        min_speed: 1.0,
        output_dir: dir.to_string_lossy().to_string(),
        unique_nodes_file: dir.join("uniqueNodes.txt").to_string_lossy().to_string(),
        parsing_log: dir.join("parsingLog.txt").to_string_lossy().to_string(),
        ..Default::default()
    };
    let generator = Generator::new(config);

    let sources = vec![(
        "local".to_string(),
        "trojan://pw@a.example.com:443#JP 01\n\
         trojan://pw@a.example.com:443#JP 02\n\
         trojan://pw@b.example.com:443#JP 01\n"
            .to_string(),
    )];
    let parsed = generator.parse_sources(&sources);
    assert_eq!(parsed.nodes.len(), 3);

    let tested = generator
        .test_nodes(parsed.nodes, TestMode::Both, &DirectRoute)
        .await;
    assert_eq!(tested.len(), 3);
    assert!(tested.iter().all(|n| n.latency > 0 && n.speed > 0.0));

    let report = generator.save(tested, TestMode::Both).await;
    assert_eq!(report.kept, 2);
    assert_eq!(report.document_path, dir.join("best.yaml"));

    let yaml = tokio::fs::read_to_string(dir.join("best.yaml")).await.unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    let proxies = value["proxies"].as_sequence().unwrap();
    assert_eq!(proxies.len(), 2);
    for entry in proxies {
        assert!(entry["name"].as_str().unwrap().contains("MB/s"));
    }

    let list = tokio::fs::read_to_string(dir.join("uniqueNodes.txt")).await.unwrap();
    assert_eq!(list.matches("\r\n").count(), 2);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_latency_threshold_drops_slow_nodes() {
    let base = spawn_http_server(16).await;
    let generator = Generator::new(AppConfig {
        tcp_test_url: format!("{}/success.html", base),
        // Every real answer takes at least a millisecond
        tcp_test_max_latency: 0,
        ..Default::default()
    });

    let tested = generator
        .test_nodes(vec![node("a", "a.example.com", 1, 0.0)], TestMode::Tcp, &DirectRoute)
        .await;
    assert!(tested.is_empty());
}
