use chrono::Utc;
use netlure::config::Config;
use netlure::event::{AttackEvent, EventBus, EventType};
use netlure::geo::NoGeo;
use netlure::reporter::Reporter;
use netlure::service::{Protocol, Transport};
use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

fn sample_event() -> AttackEvent {
    AttackEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        source_ip: "203.0.113.5".parse().unwrap(),
        source_port: 50123,
        protocol: Protocol::Http,
        transport: Transport::Tcp,
        event_type: EventType::Probe,
        payload_size: 14,
        payload_excerpt: "GET / HTTP/1.1".into(),
        extracted_fields: BTreeMap::from([("path".to_string(), "/".to_string())]),
        session_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn reporter_posts_batch_to_backend() {
    // Minimal backend: accept one HTTP POST, hand the raw request back for
    // inspection, answer 200.
    let listener = TcpListener::bind("127.0.0.1:18090").expect("bind");
    let (req_tx, req_rx) = std::sync::mpsc::channel::<String>();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            use std::io::{Read, Write};
            let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
            let mut req = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        req.extend_from_slice(&buf[..n]);
                        if body_complete(&req) {
                            break;
                        }
                    }
                }
            }
            let resp = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
            let _ = stream.write_all(resp.as_bytes());
            let _ = req_tx.send(String::from_utf8_lossy(&req).into_owned());
        }
    });

    let tmp = std::env::temp_dir().join("netlure_reporter_test");
    let _ = std::fs::remove_dir_all(&tmp);
    let cfg = Config::test_builder()
        .backend_url(Some("http://127.0.0.1:18090/".into()))
        .data_dir(tmp.clone())
        .report_interval_seconds(1)
        .build();

    let bus = Arc::new(EventBus::new(64));
    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    let reporter = Reporter::new(cfg, bus, rx).with_geo(Arc::new(NoGeo));
    let ok = reporter.send_once(vec![sample_event()]).await;
    assert!(ok, "reporter failed to send batch");

    let req = req_rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("backend never saw the request");
    assert!(req.contains("events"));
    assert!(req.contains("203.0.113.5"));
    assert!(req.contains("source_geo"));
    assert!(req.contains("unknown"));
    let _ = std::fs::remove_dir_all(&tmp);
}

/// True once the buffered request holds the full body announced by
/// Content-Length.
fn body_complete(req: &[u8]) -> bool {
    let text = String::from_utf8_lossy(req);
    let Some(head_end) = text.find("\r\n\r\n") else { return false };
    let content_length = text
        .lines()
        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().ok()))
        .flatten()
        .unwrap_or(0);
    req.len() >= head_end + 4 + content_length
}

#[tokio::test]
async fn send_once_without_backend_persists_batch() {
    let tmp = std::env::temp_dir().join("netlure_reporter_offline_test");
    let _ = std::fs::remove_dir_all(&tmp);
    let cfg = Config::test_builder()
        .backend_url(None)
        .data_dir(tmp.clone())
        .build();
    let bus = Arc::new(EventBus::new(64));
    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    let reporter = Reporter::new(cfg, bus, rx);

    assert!(reporter.send_once(vec![sample_event()]).await);
    let pending = tmp.join("pending_report.json");
    let body = std::fs::read_to_string(&pending).expect("pending file written");
    let parsed: Vec<AttackEvent> = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].event_type, EventType::Probe);
    let _ = std::fs::remove_dir_all(&tmp);
}
