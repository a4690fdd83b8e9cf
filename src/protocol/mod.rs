//! Per-protocol emulation engines. One handler struct per protocol behind a
//! tagged enum, selected once at session start from the service registry.
//! Handlers are created fresh per session and hold no shared state; malformed
//! input degrades to a generic captured event, never an error.

pub mod dns;
pub mod ftp;
pub mod http;
pub mod mongodb;
pub mod mysql;
pub mod ntp;
pub mod postgres;
pub mod redis;
pub mod ssdp;
pub mod ssh;
pub mod telnet;

use crate::event::EventType;
use crate::service::Protocol;
use std::collections::BTreeMap;

/// Structured observation extracted from one unit of attacker input.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub fields: BTreeMap<String, String>,
}

impl EventDraft {
    pub fn new(event_type: EventType) -> Self {
        Self { event_type, fields: BTreeMap::new() }
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Generic capture for input the handler could not make sense of.
    pub fn malformed(detail: &str) -> Self {
        EventDraft::new(EventType::Probe).field("malformed", detail)
    }
}

/// Outcome of one stream read handed to a TCP handler.
#[derive(Debug, Default)]
pub struct Turn {
    pub reply: Option<Vec<u8>>,
    pub events: Vec<EventDraft>,
    pub done: bool,
}

impl Turn {
    pub fn reply(bytes: impl Into<Vec<u8>>) -> Self {
        Turn { reply: Some(bytes.into()), events: Vec::new(), done: false }
    }

    pub fn event(mut self, draft: EventDraft) -> Self {
        self.events.push(draft);
        self
    }

    pub fn finish(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Outcome of one standalone UDP datagram. A reply is only produced for
/// trigger-shaped input; the session layer additionally enforces the
/// amplification ratio.
#[derive(Debug)]
pub struct DatagramTurn {
    pub reply: Option<Vec<u8>>,
    pub event: EventDraft,
}

impl DatagramTurn {
    pub fn silent(event: EventDraft) -> Self {
        Self { reply: None, event }
    }

    pub fn with_reply(reply: Vec<u8>, event: EventDraft) -> Self {
        Self { reply: Some(reply), event }
    }
}

/// Stream-oriented handlers, one per TCP protocol.
pub enum Handler {
    Http(http::Http),
    Ssh(ssh::Ssh),
    Ftp(ftp::Ftp),
    Telnet(telnet::Telnet),
    Mysql(mysql::Mysql),
    Postgres(postgres::Postgres),
    Redis(redis::Redis),
    Mongodb(mongodb::Mongodb),
}

impl Handler {
    /// Registry guarantees only TCP protocols reach a stream session.
    pub fn new(protocol: Protocol, max_login_attempts: u32) -> Handler {
        match protocol {
            Protocol::Http => Handler::Http(http::Http::new()),
            Protocol::Ssh => Handler::Ssh(ssh::Ssh::new()),
            Protocol::Ftp => Handler::Ftp(ftp::Ftp::new(max_login_attempts)),
            Protocol::Telnet => Handler::Telnet(telnet::Telnet::new(max_login_attempts)),
            Protocol::Mysql => Handler::Mysql(mysql::Mysql::new()),
            Protocol::Postgres => Handler::Postgres(postgres::Postgres::new()),
            Protocol::Redis => Handler::Redis(redis::Redis::new()),
            Protocol::Mongodb => Handler::Mongodb(mongodb::Mongodb::new()),
            Protocol::Dns | Protocol::Ntp | Protocol::Ssdp => {
                unreachable!("datagram protocol dispatched to a stream session")
            }
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Handler::Http(_) => Protocol::Http,
            Handler::Ssh(_) => Protocol::Ssh,
            Handler::Ftp(_) => Protocol::Ftp,
            Handler::Telnet(_) => Protocol::Telnet,
            Handler::Mysql(_) => Protocol::Mysql,
            Handler::Postgres(_) => Protocol::Postgres,
            Handler::Redis(_) => Protocol::Redis,
            Handler::Mongodb(_) => Protocol::Mongodb,
        }
    }

    /// Unprompted bytes sent on connect for banner-first protocols.
    pub fn greeting(&self) -> Option<Vec<u8>> {
        match self {
            Handler::Http(_) => None,
            Handler::Ssh(h) => h.greeting(),
            Handler::Ftp(h) => h.greeting(),
            Handler::Telnet(h) => h.greeting(),
            Handler::Mysql(h) => h.greeting(),
            Handler::Postgres(_) => None,
            Handler::Redis(_) => None,
            Handler::Mongodb(_) => None,
        }
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        match self {
            Handler::Http(h) => h.on_input(input),
            Handler::Ssh(h) => h.on_input(input),
            Handler::Ftp(h) => h.on_input(input),
            Handler::Telnet(h) => h.on_input(input),
            Handler::Mysql(h) => h.on_input(input),
            Handler::Postgres(h) => h.on_input(input),
            Handler::Redis(h) => h.on_input(input),
            Handler::Mongodb(h) => h.on_input(input),
        }
    }
}

/// Datagram-oriented handlers, one per UDP protocol. Stateless; every
/// datagram is a standalone interaction.
pub enum DatagramHandler {
    Dns(dns::Dns),
    Ntp(ntp::Ntp),
    Ssdp(ssdp::Ssdp),
}

impl DatagramHandler {
    pub fn new(protocol: Protocol) -> DatagramHandler {
        match protocol {
            Protocol::Dns => DatagramHandler::Dns(dns::Dns),
            Protocol::Ntp => DatagramHandler::Ntp(ntp::Ntp),
            Protocol::Ssdp => DatagramHandler::Ssdp(ssdp::Ssdp),
            _ => unreachable!("stream protocol dispatched to a datagram handler"),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            DatagramHandler::Dns(_) => Protocol::Dns,
            DatagramHandler::Ntp(_) => Protocol::Ntp,
            DatagramHandler::Ssdp(_) => Protocol::Ssdp,
        }
    }

    pub fn on_datagram(&self, payload: &[u8]) -> DatagramTurn {
        match self {
            DatagramHandler::Dns(h) => h.on_datagram(payload),
            DatagramHandler::Ntp(h) => h.on_datagram(payload),
            DatagramHandler::Ssdp(h) => h.on_datagram(payload),
        }
    }
}

/// Split attacker input into trimmed, non-empty lines, tolerating any mix of
/// line endings and junk bytes.
pub(crate) fn lossy_lines(input: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(input)
        .lines()
        .map(|l| l.trim_end_matches('\r').trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
