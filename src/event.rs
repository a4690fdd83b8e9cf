//! Attack event model and the bounded in-memory event bus that decouples
//! session I/O from delivery. Emission never blocks a session; when the
//! buffer is full the oldest events are dropped and counted.

use crate::classifier::Classifier;
use crate::metrics::{record_event_dropped, record_event_emitted, Metrics};
use crate::service::{Protocol, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connection,
    AuthAttempt,
    Command,
    AmplificationRequest,
    Probe,
}

/// One immutable record of an observed interaction unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub protocol: Protocol,
    pub transport: Transport,
    pub event_type: EventType,
    pub payload_size: usize,
    pub payload_excerpt: String,
    pub extracted_fields: BTreeMap<String, String>,
    pub session_id: Uuid,
}

const EXCERPT_MAX: usize = 160;

/// Printable-safe excerpt of hostile payload bytes. Binary input is rendered
/// as a hex prefix so the record stays valid UTF-8 either way.
pub fn excerpt(payload: &[u8]) -> String {
    let printable = payload
        .iter()
        .take(EXCERPT_MAX)
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .count();
    let sample = &payload[..payload.len().min(EXCERPT_MAX)];
    if sample.is_empty() {
        return String::new();
    }
    if printable * 4 >= sample.len() * 3 {
        String::from_utf8_lossy(sample).into_owned()
    } else {
        let mut s = String::with_capacity(sample.len().min(32) * 2 + 4);
        s.push_str("hex:");
        for b in sample.iter().take(32) {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

/// Bounded drop-oldest buffer between sessions and the reporter.
pub struct EventBus {
    buf: Mutex<VecDeque<AttackEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn emit(&self, event: AttackEvent) {
        let mut buf = self.buf.lock().expect("event buffer poisoned");
        while buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(event);
    }

    /// Take all buffered events, oldest first.
    pub fn drain(&self) -> Vec<AttackEvent> {
        let mut buf = self.buf.lock().expect("event buffer poisoned");
        buf.drain(..).collect()
    }

    /// Put undelivered events back at the front, preserving order.
    pub fn requeue(&self, events: Vec<AttackEvent>) {
        let mut buf = self.buf.lock().expect("event buffer poisoned");
        for ev in events.into_iter().rev() {
            buf.push_front(ev);
        }
        while buf.len() > self.capacity {
            buf.pop_back();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.lock().expect("event buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Fans each event out to the classifier and the bus. Shared by every
/// session; all operations are non-blocking apart from the optional
/// external-scorer refinement, which carries its own timeout.
#[derive(Clone)]
pub struct EventPipeline {
    pub bus: Arc<EventBus>,
    pub classifier: Arc<Classifier>,
    pub metrics: Option<Arc<Metrics>>,
}

impl EventPipeline {
    pub fn new(bus: Arc<EventBus>, classifier: Arc<Classifier>, metrics: Option<Arc<Metrics>>) -> Self {
        Self { bus, classifier, metrics }
    }

    pub async fn record(&self, event: AttackEvent) {
        let before = self.bus.dropped();
        self.classifier.observe(&event);
        self.classifier.refine(event.source_ip).await;
        self.bus.emit(event);
        record_event_emitted(&self.metrics);
        let lost = self.bus.dropped() - before;
        if lost > 0 {
            record_event_dropped(&self.metrics, lost);
        }
    }
}
