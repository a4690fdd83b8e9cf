use crate::event::EventBus;
use crate::guard::{Guard, Verdict};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Default)]
pub struct Metrics {
    pub tcp_sessions: AtomicU64,
    pub udp_datagrams: AtomicU64,
    pub sessions_refused: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub events_emitted: AtomicU64,
    pub events_dropped: AtomicU64,
}

impl Metrics {
    pub fn inc_tcp(&self) { self.tcp_sessions.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_udp(&self) { self.udp_datagrams.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_refused(&self) { self.sessions_refused.fetch_add(1, Ordering::Relaxed); }
    pub fn add_bytes_in(&self, n: u64) { self.bytes_in.fetch_add(n, Ordering::Relaxed); }
    pub fn add_bytes_out(&self, n: u64) { self.bytes_out.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_events(&self) { self.events_emitted.fetch_add(1, Ordering::Relaxed); }
    pub fn add_dropped(&self, n: u64) { self.events_dropped.fetch_add(n, Ordering::Relaxed); }
}

/// Management API: Prometheus-style text exposition behind the guard. Every
/// request passes `check(ip)` first; rate-limited or blacklisted callers get
/// a fixed 429 and nothing else.
pub async fn spawn_admin_server(
    addr: String,
    metrics: Arc<Metrics>,
    bus: Arc<EventBus>,
    guard: Arc<Guard>,
) {
    let bind: SocketAddr = match addr.parse() {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(%addr, error = %e, "invalid admin bind address; admin API disabled");
            return;
        }
    };
    info!(%bind, "management API starting");
    tokio::spawn(async move {
        use tokio::net::TcpListener;
        let listener = match TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = ?e, "admin bind failed");
                return;
            }
        };
        loop {
            if let Ok((mut s, peer)) = listener.accept().await {
                let resp = match guard.check(peer.ip()) {
                    Verdict::Allowed => {
                        let body = exposition(&metrics, bus.len() as u64, bus.dropped());
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    }
                    Verdict::RateLimited | Verdict::Blacklisted => {
                        "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\n\r\n".to_string()
                    }
                };
                let _ = s.write_all(resp.as_bytes()).await;
            }
        }
    });
}

fn exposition(m: &Metrics, buffered: u64, dropped: u64) -> String {
    format!(
        "# HELP tcp_sessions total TCP sessions handled\n# TYPE tcp_sessions counter\ntcp_sessions {}\n\
         # HELP udp_datagrams total UDP datagrams received\n# TYPE udp_datagrams counter\nudp_datagrams {}\n\
         # HELP sessions_refused sessions refused at the concurrency cap\n# TYPE sessions_refused counter\nsessions_refused {}\n\
         # HELP bytes_in total bytes received across TCP/UDP\n# TYPE bytes_in counter\nbytes_in {}\n\
         # HELP bytes_out total bytes sent across TCP/UDP\n# TYPE bytes_out counter\nbytes_out {}\n\
         # HELP events_emitted total attack events emitted\n# TYPE events_emitted counter\nevents_emitted {}\n\
         # HELP events_dropped attack events dropped by the bounded buffer\n# TYPE events_dropped counter\nevents_dropped {}\n\
         # HELP events_buffered current events in the memory buffer\n# TYPE events_buffered gauge\nevents_buffered {}\n",
        m.tcp_sessions.load(Ordering::Relaxed),
        m.udp_datagrams.load(Ordering::Relaxed),
        m.sessions_refused.load(Ordering::Relaxed),
        m.bytes_in.load(Ordering::Relaxed),
        m.bytes_out.load(Ordering::Relaxed),
        m.events_emitted.load(Ordering::Relaxed),
        dropped.max(m.events_dropped.load(Ordering::Relaxed)),
        buffered,
    )
}

pub fn record_tcp_session(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_tcp(); } }
pub fn record_udp_datagram(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_udp(); } }
pub fn record_refused(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_refused(); } }
pub fn record_bytes_in(metrics: &Option<Arc<Metrics>>, n: usize) { if let Some(m) = metrics { m.add_bytes_in(n as u64); } }
pub fn record_bytes_out(metrics: &Option<Arc<Metrics>>, n: usize) { if let Some(m) = metrics { m.add_bytes_out(n as u64); } }
pub fn record_event_emitted(metrics: &Option<Arc<Metrics>>) { if let Some(m) = metrics { m.inc_events(); } }
pub fn record_event_dropped(metrics: &Option<Arc<Metrics>>, n: u64) { if let Some(m) = metrics { m.add_dropped(n); } }
