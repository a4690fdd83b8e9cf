//! DNS emulation over UDP: header and question parsing, REFUSED responses,
//! and amplification flagging for ANY/TXT queries. Replies echo only the
//! question section, so they can never outgrow the request.

use super::{DatagramTurn, EventDraft};
use crate::event::EventType;

const QTYPE_TXT: u16 = 16;
const QTYPE_ANY: u16 = 255;
const RCODE_REFUSED: u16 = 5;
const MAX_QNAME_LABELS: usize = 32;

pub struct Dns;

impl Dns {
    pub fn on_datagram(&self, payload: &[u8]) -> DatagramTurn {
        if payload.len() < 12 {
            return DatagramTurn::silent(EventDraft::malformed("short dns message"));
        }
        let id = u16::from_be_bytes([payload[0], payload[1]]);
        let flags = u16::from_be_bytes([payload[2], payload[3]]);
        let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
        if flags & 0x8000 != 0 || qdcount == 0 {
            // A response, or a query with no question: not a trigger shape.
            return DatagramTurn::silent(EventDraft::malformed("dns message without question"));
        }

        let Some((qname, qtype, question_end)) = parse_question(&payload[12..]) else {
            return DatagramTurn::silent(EventDraft::malformed("undecodable dns question"));
        };

        let amplification_prone = qtype == QTYPE_ANY || qtype == QTYPE_TXT;
        let event_type = if amplification_prone {
            EventType::AmplificationRequest
        } else {
            EventType::Probe
        };
        let draft = EventDraft::new(event_type)
            .field("qname", qname)
            .field("qtype", qtype_name(qtype))
            .field("query_id", id.to_string());

        // REFUSED, echoing only the question. RD is copied, RA never set.
        let reply_flags = 0x8000 | (flags & 0x0100) | RCODE_REFUSED;
        let mut reply = Vec::with_capacity(12 + question_end);
        reply.extend_from_slice(&id.to_be_bytes());
        reply.extend_from_slice(&reply_flags.to_be_bytes());
        reply.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        reply.extend_from_slice(&[0u8; 6]); // an/ns/ar counts
        reply.extend_from_slice(&payload[12..12 + question_end]);

        DatagramTurn::with_reply(reply, draft)
    }
}

/// Parse one question: labels, qtype, qclass. Returns the decoded name, the
/// qtype, and the byte length of the question section.
fn parse_question(q: &[u8]) -> Option<(String, u16, usize)> {
    let mut pos = 0usize;
    let mut name = String::new();
    let mut labels = 0usize;
    loop {
        let len = *q.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        // Compression pointers never appear in a question we accept.
        if len & 0xc0 != 0 || labels >= MAX_QNAME_LABELS {
            return None;
        }
        let label = q.get(pos..pos + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));
        pos += len;
        labels += 1;
    }
    let qtype = u16::from_be_bytes([*q.get(pos)?, *q.get(pos + 1)?]);
    pos += 4; // qtype + qclass
    if pos > q.len() {
        return None;
    }
    Some((name, qtype, pos))
}

fn qtype_name(qtype: u16) -> String {
    match qtype {
        1 => "A".into(),
        2 => "NS".into(),
        15 => "MX".into(),
        QTYPE_TXT => "TXT".into(),
        28 => "AAAA".into(),
        QTYPE_ANY => "ANY".into(),
        other => other.to_string(),
    }
}
