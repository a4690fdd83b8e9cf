//! HTTP emulation: a plausible status line and headers for any request line,
//! one response per connection.

use super::{lossy_lines, EventDraft, Turn};
use crate::event::EventType;

const SERVER_HEADER: &str = "Apache/2.4.29 (Ubuntu)";
const BODY: &str = "<html><body><h1>It works!</h1></body></html>";

#[derive(Default)]
pub struct Http;

impl Http {
    pub fn new() -> Self {
        Http
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        let lines = lossy_lines(input);
        let Some(request_line) = lines.first() else {
            return Turn::reply(self.response(400)).event(EventDraft::malformed("empty request")).finish();
        };

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");
        let version = parts.next().unwrap_or("");

        let known_method = matches!(
            method,
            "GET" | "POST" | "HEAD" | "PUT" | "DELETE" | "OPTIONS" | "PATCH" | "TRACE" | "CONNECT"
        );
        if !known_method || path.is_empty() {
            return Turn::reply(self.response(400))
                .event(EventDraft::malformed("bad request line").field("request_line", request_line.clone()))
                .finish();
        }

        let mut draft = EventDraft::new(EventType::Probe)
            .field("method", method)
            .field("path", path)
            .field("version", version);
        for line in &lines[1..] {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "host" => draft = draft.field("host", value.trim()),
                    "user-agent" => draft = draft.field("user_agent", value.trim()),
                    "authorization" => {
                        draft.event_type = EventType::AuthAttempt;
                        draft = draft.field("authorization", value.trim());
                    }
                    _ => {}
                }
            }
        }

        let status = if path.contains("..") || path.contains("/etc/") { 403 } else { 200 };
        Turn::reply(self.response(status)).event(draft).finish()
    }

    fn response(&self, status: u16) -> Vec<u8> {
        let (code, reason, body) = match status {
            400 => (400, "Bad Request", "<html><body><h1>400 Bad Request</h1></body></html>"),
            403 => (403, "Forbidden", "<html><body><h1>403 Forbidden</h1></body></html>"),
            _ => (200, "OK", BODY),
        };
        format!(
            "HTTP/1.1 {code} {reason}\r\nServer: {SERVER_HEADER}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_request_yields_probe_with_fields() {
        let mut h = Http::new();
        let turn = h.on_input(b"GET /admin HTTP/1.1\r\nHost: victim\r\nUser-Agent: zgrab/0.x\r\n\r\n");
        assert!(turn.done);
        let reply = String::from_utf8(turn.reply.unwrap()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
        assert!(reply.contains("Server: Apache"));
        assert_eq!(turn.events.len(), 1);
        let ev = &turn.events[0];
        assert_eq!(ev.event_type, EventType::Probe);
        assert_eq!(ev.fields["method"], "GET");
        assert_eq!(ev.fields["path"], "/admin");
        assert_eq!(ev.fields["user_agent"], "zgrab/0.x");
    }

    #[test]
    fn authorization_header_is_an_auth_attempt() {
        let mut h = Http::new();
        let turn = h.on_input(b"GET / HTTP/1.1\r\nAuthorization: Basic cm9vdDpyb290\r\n\r\n");
        assert_eq!(turn.events[0].event_type, EventType::AuthAttempt);
    }

    #[test]
    fn traversal_path_is_forbidden() {
        let mut h = Http::new();
        let turn = h.on_input(b"GET /../../etc/passwd HTTP/1.1\r\n\r\n");
        let reply = String::from_utf8(turn.reply.unwrap()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 403"));
    }

    #[test]
    fn garbage_degrades_to_generic_capture() {
        let mut h = Http::new();
        let turn = h.on_input(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(turn.done);
        assert_eq!(turn.events[0].event_type, EventType::Probe);
        assert!(turn.events[0].fields.contains_key("malformed"));
        let reply = String::from_utf8(turn.reply.unwrap()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 400"));
    }
}
