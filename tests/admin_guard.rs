use netlure::event::EventBus;
use netlure::guard::{Guard, GuardConfig};
use netlure::metrics::{spawn_admin_server, Metrics};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn fetch(addr: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /metrics HTTP/1.1\r\n\r\n").await.unwrap();
    let mut resp = Vec::new();
    let _ = stream.read_to_end(&mut resp).await;
    String::from_utf8_lossy(&resp).into_owned()
}

#[tokio::test]
async fn admin_api_rate_limits_then_rejects() {
    let guard = Arc::new(Guard::new(GuardConfig {
        max_requests: 3,
        ..GuardConfig::default()
    }));
    let metrics = Arc::new(Metrics::default());
    metrics.inc_tcp();
    let bus = Arc::new(EventBus::new(16));
    spawn_admin_server("127.0.0.1:19100".into(), metrics, bus, guard).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    for _ in 0..3 {
        let resp = fetch("127.0.0.1:19100").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK"), "expected 200, got: {resp}");
        assert!(resp.contains("tcp_sessions 1"));
    }
    // Fourth and later requests within the window are rejected with a fixed
    // response and no metrics body.
    for _ in 0..3 {
        let resp = fetch("127.0.0.1:19100").await;
        assert!(resp.starts_with("HTTP/1.1 429"), "expected 429, got: {resp}");
        assert!(!resp.contains("tcp_sessions"));
    }
}

#[tokio::test]
async fn whitelisted_ip_is_never_limited() {
    let mut cfg = GuardConfig { max_requests: 1, ..GuardConfig::default() };
    cfg.whitelist.insert("127.0.0.1".parse().unwrap());
    let guard = Arc::new(Guard::new(cfg));
    let metrics = Arc::new(Metrics::default());
    let bus = Arc::new(EventBus::new(16));
    spawn_admin_server("127.0.0.1:19101".into(), metrics, bus, guard).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    for _ in 0..10 {
        let resp = fetch("127.0.0.1:19101").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK"));
    }
}
