//! SSH emulation: version-exchange banner on connect, capture the client's
//! offered version string, never start a real key exchange.

use super::{EventDraft, Turn};
use crate::event::EventType;

pub const BANNER: &str = "SSH-2.0-OpenSSH_7.4p1 Debian-10\r\n";

#[derive(Default)]
pub struct Ssh {
    version_seen: bool,
}

impl Ssh {
    pub fn new() -> Self {
        Ssh::default()
    }

    pub fn greeting(&self) -> Option<Vec<u8>> {
        Some(BANNER.as_bytes().to_vec())
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        if !self.version_seen {
            self.version_seen = true;
            let first_line = input
                .split(|b| *b == b'\n')
                .next()
                .map(|l| String::from_utf8_lossy(l).trim_end_matches('\r').trim().to_string())
                .unwrap_or_default();
            if first_line.starts_with("SSH-") {
                // Version string captured; closing here leaves key exchange
                // forever incomplete.
                return Turn::default()
                    .event(EventDraft::new(EventType::Probe).field("client_version", first_line))
                    .finish();
            }
            return Turn::default()
                .event(EventDraft::malformed("non-ssh version exchange"))
                .finish();
        }
        Turn::default().event(EventDraft::malformed("bytes after version exchange")).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_is_sent_unprompted() {
        let h = Ssh::new();
        assert_eq!(h.greeting().unwrap(), BANNER.as_bytes());
    }

    #[test]
    fn client_version_is_captured_and_session_ends() {
        let mut h = Ssh::new();
        let turn = h.on_input(b"SSH-2.0-libssh2_1.9.0\r\n");
        assert!(turn.done);
        assert!(turn.reply.is_none());
        assert_eq!(turn.events[0].fields["client_version"], "SSH-2.0-libssh2_1.9.0");
    }

    #[test]
    fn non_ssh_bytes_degrade_to_generic_capture() {
        let mut h = Ssh::new();
        let turn = h.on_input(b"\x16\x03\x01");
        assert!(turn.done);
        assert!(turn.events[0].fields.contains_key("malformed"));
    }
}
