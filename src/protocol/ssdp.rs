//! SSDP emulation over UDP: parse HTTP-like M-SEARCH messages, reply
//! minimally, and flag broad search targets that indicate scanning or
//! reflection staging.

use super::{lossy_lines, DatagramTurn, EventDraft};
use crate::event::EventType;

pub struct Ssdp;

impl Ssdp {
    pub fn on_datagram(&self, payload: &[u8]) -> DatagramTurn {
        let lines = lossy_lines(payload);
        let Some(request_line) = lines.first() else {
            return DatagramTurn::silent(EventDraft::malformed("empty ssdp datagram"));
        };

        if request_line.to_uppercase().starts_with("NOTIFY") {
            // Device announcements are not queries; record but stay silent.
            return DatagramTurn::silent(
                EventDraft::new(EventType::Probe).field("method", "NOTIFY"),
            );
        }
        if !request_line.to_uppercase().starts_with("M-SEARCH") {
            return DatagramTurn::silent(EventDraft::malformed("non-ssdp datagram"));
        }

        let mut st = String::new();
        let mut man = String::new();
        for line in &lines[1..] {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_uppercase().as_str() {
                    "ST" => st = value.trim().to_string(),
                    "MAN" => man = value.trim().to_string(),
                    _ => {}
                }
            }
        }

        // ssdp:all / rootdevice sweeps enumerate every device: the classic
        // pre-reflection reconnaissance shape.
        let broad = st == "ssdp:all" || st == "upnp:rootdevice" || st.is_empty();
        let event_type = if broad { EventType::AmplificationRequest } else { EventType::Probe };
        let draft = EventDraft::new(event_type)
            .field("search_target", st.clone())
            .field("man", man);

        let response = format!(
            "HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1800\r\nEXT:\r\nST: {}\r\nUSN: uuid:8c1b...::upnp:rootdevice\r\nSERVER: Linux/4.15 UPnP/1.0\r\n\r\n",
            if st.is_empty() { "upnp:rootdevice" } else { st.as_str() }
        );
        DatagramTurn::with_reply(response.into_bytes(), draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSEARCH_ALL: &[u8] = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nMX: 1\r\nST: ssdp:all\r\n\r\n";

    #[test]
    fn broad_search_is_flagged_as_amplification() {
        let h = Ssdp;
        let turn = h.on_datagram(MSEARCH_ALL);
        assert_eq!(turn.event.event_type, EventType::AmplificationRequest);
        assert_eq!(turn.event.fields["search_target"], "ssdp:all");
        assert!(String::from_utf8(turn.reply.unwrap()).unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn specific_search_target_is_a_probe() {
        let h = Ssdp;
        let req = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nST: urn:schemas-upnp-org:service:WANIPConnection:1\r\n\r\n";
        let turn = h.on_datagram(req);
        assert_eq!(turn.event.event_type, EventType::Probe);
        assert!(turn.reply.is_some());
    }

    #[test]
    fn notify_is_recorded_but_unanswered() {
        let h = Ssdp;
        let turn = h.on_datagram(b"NOTIFY * HTTP/1.1\r\nNT: upnp:rootdevice\r\n\r\n");
        assert!(turn.reply.is_none());
        assert_eq!(turn.event.fields["method"], "NOTIFY");
    }

    #[test]
    fn garbage_gets_no_reply() {
        let h = Ssdp;
        let turn = h.on_datagram(&[0x01, 0x02, 0x03]);
        assert!(turn.reply.is_none());
        assert!(turn.event.fields.contains_key("malformed"));
    }
}
