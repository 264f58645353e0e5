use std::collections::HashMap;
use std::time::Duration;

use probescope::cli::{OutputFormat, ProbeMode};
use probescope::config::ProbeConfig;
use probescope::error::ProbeError;
use probescope::network::expand_targets;
use probescope::output::{OutputWriter, ProbeReport};
use probescope::probe::{ProbeCatalog, ProbeEngine, Target};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

fn quick_config() -> ProbeConfig {
    ProbeConfig {
        timeout: Duration::from_secs(5),
        read_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_millis(500),
        ..ProbeConfig::default()
    }
}

/// Accepts connections forever, answering each with `reply` after `delay`.
async fn mock_server(reply: &'static [u8], delay: Duration) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = socket.write_all(reply).await;
                let mut sink = [0u8; 1024];
                let _ = tokio::time::timeout(Duration::from_millis(200), socket.read(&mut sink)).await;
            });
        }
    });
    port
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_ssh_banner_end_to_end() {
    let port = mock_server(b"SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5\r\n", Duration::ZERO).await;
    let engine = ProbeEngine::new(quick_config()).unwrap();
    let probe = engine.catalog().get("SSHVersionExchange").unwrap();

    let result = engine.execute_probe(&Target::new("127.0.0.1", port), &probe).await;

    assert!(result.success, "error: {:?}", result.error);
    let info = result.parsed_info.as_ref().unwrap();
    assert_eq!(info.product, "OpenSSH");
    assert_eq!(info.version, "8.2p1");
    assert_eq!(info.os, "Ubuntu");
    assert_eq!(info.field("ubuntu_package"), Some("4"));
    assert!(result.banner.starts_with("SSH-2.0"));
    assert_eq!(result.response_hex, hex::encode(&result.response));
}

#[tokio::test]
async fn test_redis_pong_end_to_end() {
    let port = mock_server(b"+PONG\r\n", Duration::ZERO).await;
    let engine = ProbeEngine::new(quick_config()).unwrap();
    let probe = engine.catalog().get("RedisPing").unwrap();

    let result = engine.execute_probe(&Target::new("127.0.0.1", port), &probe).await;

    assert!(result.success);
    assert!(result.confidence() >= 90);
    assert_eq!(result.parsed_info.unwrap().field("response"), Some("PONG"));
}

#[tokio::test]
async fn test_null_probe_without_decoder_keeps_raw_banner() {
    let port = mock_server(b"220 welcome\r\n\x01", Duration::ZERO).await;
    let engine = ProbeEngine::new(quick_config()).unwrap();
    let probe = engine.catalog().get("NULL").unwrap();

    let result = engine.execute_probe(&Target::new("127.0.0.1", port), &probe).await;

    assert!(result.success);
    assert!(result.parsed_info.is_none());
    assert_eq!(result.banner, "220 welcome\r\n\\x01");
}

#[tokio::test]
async fn test_udp_exchange() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        if let Ok((_, peer)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(b"\x00\x00\x90\x00\x00\x00\x00\x00\x00\x00\x00\x00", peer).await;
        }
    });

    let engine = ProbeEngine::new(quick_config()).unwrap();
    let probe = engine.catalog().get("DNSStatusRequest").unwrap();
    let result = engine.execute_probe(&Target::new("127.0.0.1", port), &probe).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.response.len(), 12);
    assert_eq!(result.protocol, "dns");
}

#[tokio::test]
async fn test_connection_refused_is_a_failed_result() {
    let engine = ProbeEngine::new(quick_config()).unwrap();
    let target = Target::new("127.0.0.1", closed_port());

    let results = engine.probe_target_with_mode(&target, ProbeMode::Port).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].probe_name, "NULL");
    assert!(!results[0].success);
    assert!(results[0].error.is_some());
    assert!(results[0].response.is_empty());
}

#[tokio::test]
async fn test_silent_server_hits_read_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = ProbeConfig {
        read_timeout: Duration::from_millis(100),
        ..quick_config()
    };
    let engine = ProbeEngine::new(config).unwrap();
    let probe = engine.catalog().get("NULL").unwrap();
    let result = engine.execute_probe(&Target::new("127.0.0.1", port), &probe).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_all_mode_runs_every_probe_once() {
    let port = mock_server(b"SSH-2.0-OpenSSH_9.6\r\n", Duration::ZERO).await;
    let engine = ProbeEngine::new(quick_config()).unwrap();

    let results = engine.probe_target(&Target::new("127.0.0.1", port)).await;

    assert_eq!(results.len(), engine.catalog().len());
    let mut names: Vec<_> = results.iter().map(|r| r.probe_name.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), results.len());
    assert_eq!(engine.get_stats().total_probes, results.len());
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let mut catalog = ProbeCatalog::new();
    catalog.add_custom("Hold", "", &[], "tcp", "wait for a greeting").unwrap();
    let config = ProbeConfig {
        max_concurrency: 4,
        ..quick_config()
    };
    let engine = ProbeEngine::with_catalog(config, catalog).unwrap();

    let mut targets = Vec::new();
    for _ in 0..40 {
        let port = mock_server(b"hello\r\n", Duration::from_millis(30)).await;
        targets.push(Target::new("127.0.0.1", port));
    }

    let results = engine.probe_multiple_targets_with_mode(&targets, ProbeMode::Smart).await;

    assert_eq!(results.len(), 40);
    assert!(results.values().all(|r| r.len() == 1 && r[0].success));
    assert!(engine.peak_in_flight() <= 4);
    assert!(engine.peak_in_flight() >= 1);
    assert_eq!(engine.get_stats().success_probes, 40);
}

#[tokio::test]
async fn test_multiple_targets_keyed_by_host_port() {
    let open = mock_server(b"+PONG\r\n", Duration::ZERO).await;
    let closed = closed_port();
    let engine = ProbeEngine::new(quick_config()).unwrap();
    let targets = expand_targets("127.0.0.1", &format!("{},{}", open, closed)).unwrap();

    let results = engine.probe_multiple_targets_with_mode(&targets, ProbeMode::Smart).await;

    assert_eq!(results.len(), 2);
    assert!(results[&format!("127.0.0.1:{}", open)].iter().any(|r| r.success));
    assert!(results[&format!("127.0.0.1:{}", closed)].iter().all(|r| !r.success));
    assert!(results.values().all(|r| r.len() <= 10));
}

#[tokio::test]
async fn test_cancelled_context_returns_error() {
    let port = mock_server(b"late\r\n", Duration::from_secs(2)).await;
    let engine = ProbeEngine::new(quick_config()).unwrap();
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let outcome = engine.probe_with_context(&token, &Target::new("127.0.0.1", port)).await;
    assert!(matches!(outcome, Err(ProbeError::Cancelled)));
}

#[tokio::test]
async fn test_overall_timeout_returns_error() {
    let port = mock_server(b"late\r\n", Duration::from_secs(3)).await;
    let config = ProbeConfig {
        timeout: Duration::from_millis(100),
        read_timeout: Duration::from_secs(5),
        ..quick_config()
    };
    let engine = ProbeEngine::new(config).unwrap();

    let outcome = engine
        .probe_with_context(&CancellationToken::new(), &Target::new("127.0.0.1", port))
        .await;
    assert!(matches!(outcome, Err(ProbeError::Timeout(100))));
}

#[tokio::test]
async fn test_json_report_file() {
    let port = mock_server(b"+PONG\r\n", Duration::ZERO).await;
    let engine = ProbeEngine::new(quick_config()).unwrap();
    let target = Target::new("127.0.0.1", port);
    let results: HashMap<_, _> = engine
        .probe_multiple_targets_with_mode(&[target.clone()], ProbeMode::Port)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let report = ProbeReport::new(results, Some(engine.get_stats()));
    OutputWriter::new(OutputFormat::Json, Some(path.clone()))
        .unwrap()
        .write(&report)
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["summary"]["total_targets"], 1);
    assert!(json["stats"]["total_probes"].as_u64().unwrap() >= 1);
    let first = &json["results"][target.key()][0];
    assert!(first["response"].is_string());
    assert!(first["duration"].is_u64());
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"max_concurrency": 7, "read_timeout": 250}"#).unwrap();

    let config = ProbeConfig::load(&path).unwrap();
    assert_eq!(config.max_concurrency, 7);
    assert_eq!(config.read_timeout, Duration::from_millis(250));
    assert_eq!(config.connect_timeout, Duration::from_secs(3));
    assert!(config.validate().is_ok());
}
