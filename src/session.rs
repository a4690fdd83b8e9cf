//! Session orchestration: one attacker interaction driven through its
//! protocol handler, bounded by idle and lifetime timeouts and an input cap.
//! Handler invocations are supervised; any internal failure degrades to a
//! generic captured event and ends only this session.

use crate::error::NetlureError;
use crate::event::{excerpt, AttackEvent, EventPipeline, EventType};
use crate::metrics::{record_bytes_in, record_bytes_out};
use crate::protocol::{DatagramHandler, EventDraft, Handler, Turn};
use crate::service::Service;
use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
    TimedOut,
    Reset,
}

/// Bounded lifetime of one attacker's interaction with one emulated service.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub service: Service,
    pub remote: SocketAddr,
    pub start_time: chrono::DateTime<Utc>,
    pub state: SessionState,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub events_emitted: u64,
}

impl Session {
    pub fn new(service: Service, remote: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            service,
            remote,
            start_time: Utc::now(),
            state: SessionState::Open,
            bytes_in: 0,
            bytes_out: 0,
            events_emitted: 0,
        }
    }

    fn event(&self, event_type: EventType, payload: &[u8], fields: std::collections::BTreeMap<String, String>) -> AttackEvent {
        AttackEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_ip: self.remote.ip(),
            source_port: self.remote.port(),
            protocol: self.service.protocol,
            transport: self.service.transport,
            event_type,
            payload_size: payload.len(),
            payload_excerpt: excerpt(payload),
            extracted_fields: fields,
            session_id: self.id,
        }
    }
}

/// Per-session limits lifted from config once at listener setup.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub max_input_bytes: usize,
    pub max_login_attempts: u32,
    pub max_amplification_ratio: u32,
}

/// Supervised handler call: a panic inside protocol code becomes a generic
/// captured event and terminates the session, never the process.
fn guarded_turn(handler: &mut Handler, input: &[u8]) -> Turn {
    match catch_unwind(AssertUnwindSafe(|| handler.on_input(input))) {
        Ok(turn) => turn,
        Err(_) => {
            warn!(protocol = %handler.protocol(), "protocol handler panicked; degrading to generic capture");
            Turn::default().event(EventDraft::malformed("handler failure")).finish()
        }
    }
}

/// Drive one accepted TCP connection to a terminal state.
pub async fn run_tcp_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    service: Service,
    limits: SessionLimits,
    pipeline: EventPipeline,
) {
    let mut session = Session::new(service.clone(), peer);
    let mut handler = Handler::new(service.protocol, limits.max_login_attempts);
    let deadline = Instant::now() + limits.max_lifetime;

    if let Some(greeting) = handler.greeting() {
        if stream.write_all(&greeting).await.is_err() {
            session.state = SessionState::Reset;
        } else {
            session.bytes_out += greeting.len() as u64;
            record_bytes_out(&pipeline.metrics, greeting.len());
        }
    }

    // Reads land in a cap-sized buffer: anything beyond the input cap is
    // truncated before the handler sees it.
    let mut buf = vec![0u8; limits.max_input_bytes.max(64)];
    while session.state == SessionState::Open {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            session.state = SessionState::TimedOut;
            break;
        }
        match timeout(limits.idle_timeout.min(remaining), stream.read(&mut buf)).await {
            Err(_) => session.state = SessionState::TimedOut,
            Ok(Ok(0)) => session.state = SessionState::Closed,
            Ok(Err(_)) => session.state = SessionState::Reset,
            Ok(Ok(n)) => {
                session.bytes_in += n as u64;
                record_bytes_in(&pipeline.metrics, n);
                let turn = guarded_turn(&mut handler, &buf[..n]);
                for draft in turn.events {
                    if let Some(detail) = draft.fields.get("malformed") {
                        debug!(
                            error = %NetlureError::ProtocolParse {
                                protocol: service.protocol,
                                detail: detail.clone(),
                            },
                            "input captured as generic probe"
                        );
                    }
                    session.events_emitted += 1;
                    pipeline
                        .record(session.event(draft.event_type, &buf[..n], draft.fields))
                        .await;
                }
                if let Some(reply) = turn.reply {
                    if stream.write_all(&reply).await.is_err() {
                        session.state = SessionState::Reset;
                        break;
                    }
                    session.bytes_out += reply.len() as u64;
                    record_bytes_out(&pipeline.metrics, reply.len());
                }
                if turn.done {
                    session.state = SessionState::Closed;
                }
            }
        }
    }

    // Invariant: every accepted connection yields at least one terminal event.
    if session.events_emitted == 0 {
        session.events_emitted += 1;
        pipeline
            .record(session.event(EventType::Connection, &[], Default::default()))
            .await;
    }
    debug!(
        id = %session.id,
        protocol = %session.service.protocol,
        peer = %session.remote,
        state = ?session.state,
        duration_ms = (Utc::now() - session.start_time).num_milliseconds(),
        bytes_in = session.bytes_in,
        bytes_out = session.bytes_out,
        events = session.events_emitted,
        "session finished"
    );
}

/// Handle one UDP datagram as a standalone session. Returns the reply to
/// send, already passed through the amplification guard.
pub async fn handle_datagram(
    handler: &DatagramHandler,
    payload: &[u8],
    peer: SocketAddr,
    service: &Service,
    limits: SessionLimits,
    pipeline: &EventPipeline,
) -> Option<Vec<u8>> {
    let mut session = Session::new(service.clone(), peer);
    session.bytes_in = payload.len() as u64;

    // Same truncation cap as streams before the handler runs.
    let input = &payload[..payload.len().min(limits.max_input_bytes)];
    let turn = match catch_unwind(AssertUnwindSafe(|| handler.on_datagram(input))) {
        Ok(turn) => turn,
        Err(_) => {
            warn!(protocol = %handler.protocol(), "datagram handler panicked; degrading to generic capture");
            crate::protocol::DatagramTurn::silent(EventDraft::malformed("handler failure"))
        }
    };

    session.events_emitted += 1;
    pipeline
        .record(session.event(turn.event.event_type, input, turn.event.fields))
        .await;
    session.state = SessionState::Closed;

    let reply = turn.reply.and_then(|r| clamp_reply(r, input.len(), limits.max_amplification_ratio));
    if let Some(r) = &reply {
        session.bytes_out = r.len() as u64;
        record_bytes_out(&pipeline.metrics, r.len());
    }
    debug!(
        id = %session.id,
        protocol = %session.service.protocol,
        peer = %session.remote,
        state = ?session.state,
        bytes_in = session.bytes_in,
        bytes_out = session.bytes_out,
        replied = reply.is_some(),
        "datagram handled"
    );
    reply
}

/// Amplification guard: reply_size <= request_size * ratio, always. Oversize
/// replies are truncated rather than suppressed so trigger-shaped probes
/// still see a bounded answer.
fn clamp_reply(reply: Vec<u8>, request_size: usize, ratio: u32) -> Option<Vec<u8>> {
    let cap = request_size.saturating_mul(ratio as usize);
    if cap == 0 || reply.is_empty() {
        return None;
    }
    if reply.len() > cap {
        return Some(reply[..cap].to_vec());
    }
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_allows_replies_within_ratio() {
        let reply = vec![0u8; 90];
        assert_eq!(clamp_reply(reply.clone(), 30, 3).unwrap().len(), 90);
    }

    #[test]
    fn clamp_truncates_oversize_replies() {
        let reply = vec![0u8; 500];
        assert_eq!(clamp_reply(reply, 30, 3).unwrap().len(), 90);
    }

    #[test]
    fn clamp_suppresses_replies_to_empty_requests() {
        assert!(clamp_reply(vec![1, 2, 3], 0, 3).is_none());
    }
}
