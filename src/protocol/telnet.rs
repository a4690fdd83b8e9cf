//! Telnet emulation: banner plus a login/password prompt loop capturing
//! credentials line by line, capped per session.

use super::{EventDraft, Turn};
use crate::event::EventType;

pub const BANNER: &str = "Ubuntu 18.04.5 LTS\r\nlogin: ";

enum Expect {
    Username,
    Password { username: String },
}

pub struct Telnet {
    expect: Expect,
    login_attempts: u32,
    max_login_attempts: u32,
}

impl Telnet {
    pub fn new(max_login_attempts: u32) -> Self {
        Self { expect: Expect::Username, login_attempts: 0, max_login_attempts }
    }

    pub fn greeting(&self) -> Option<Vec<u8>> {
        Some(BANNER.as_bytes().to_vec())
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        // Strip IAC option negotiation bytes before line handling.
        let cleaned: Vec<u8> = strip_iac(input);
        let line = String::from_utf8_lossy(&cleaned).trim().to_string();
        if line.is_empty() {
            return Turn::default();
        }
        match std::mem::replace(&mut self.expect, Expect::Username) {
            Expect::Username => {
                self.expect = Expect::Password { username: line };
                Turn::reply(b"Password: ".to_vec())
            }
            Expect::Password { username } => {
                self.login_attempts += 1;
                let draft = EventDraft::new(EventType::AuthAttempt)
                    .field("username", username)
                    .field("password", line);
                if self.login_attempts >= self.max_login_attempts {
                    return Turn::reply(b"Login incorrect\r\nToo many failures.\r\n".to_vec())
                        .event(draft)
                        .finish();
                }
                self.expect = Expect::Username;
                Turn::reply(b"Login incorrect\r\nlogin: ".to_vec()).event(draft)
            }
        }
    }
}

/// Drop telnet IAC command sequences (0xFF followed by one or two bytes).
fn strip_iac(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == 0xff {
            // IAC WILL/WONT/DO/DONT take an option byte; everything else is
            // a two-byte command.
            i += if i + 1 < input.len() && (0xfb..=0xfe).contains(&input[i + 1]) { 3 } else { 2 };
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_then_password_yields_auth_attempt() {
        let mut h = Telnet::new(6);
        let first = h.on_input(b"root\r\n");
        assert_eq!(first.reply.unwrap(), b"Password: ");
        let second = h.on_input(b"toor\r\n");
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].fields["username"], "root");
        assert_eq!(second.events[0].fields["password"], "toor");
        assert!(!second.done);
    }

    #[test]
    fn attempts_are_capped() {
        let mut h = Telnet::new(2);
        h.on_input(b"a\r\n");
        assert!(!h.on_input(b"1\r\n").done);
        h.on_input(b"b\r\n");
        assert!(h.on_input(b"2\r\n").done);
    }

    #[test]
    fn iac_negotiation_is_stripped() {
        let mut h = Telnet::new(6);
        // IAC DO ECHO, IAC WILL SGA, then the username.
        let turn = h.on_input(&[0xff, 0xfd, 0x01, 0xff, 0xfb, 0x03, b'p', b'i', b'\r', b'\n']);
        assert_eq!(turn.reply.unwrap(), b"Password: ");
        let second = h.on_input(b"x\r\n");
        assert_eq!(second.events[0].fields["username"], "pi");
    }

    #[test]
    fn pure_negotiation_produces_no_turn() {
        let mut h = Telnet::new(6);
        let turn = h.on_input(&[0xff, 0xfd, 0x01]);
        assert!(turn.reply.is_none());
        assert!(turn.events.is_empty());
    }
}
