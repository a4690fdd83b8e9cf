//! MySQL emulation: protocol-correct HandshakeV10 greeting (version string,
//! connection id, scramble), capture of the client's handshake response, and
//! an unconditional 1045 access-denied error. Advertises 5.7.31 with
//! mysql_native_password.

use super::{EventDraft, Turn};
use crate::event::EventType;
use rand::Rng;

pub const SERVER_VERSION: &str = "5.7.31-log";

pub struct Mysql {
    connection_id: u32,
    scramble: [u8; 20],
    greeted: bool,
}

impl Mysql {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut scramble = [0u8; 20];
        // Scramble bytes must avoid NUL, which terminates the wire fields.
        for b in scramble.iter_mut() {
            *b = rng.gen_range(1..=255);
        }
        Self { connection_id: rng.gen_range(100..100_000), scramble, greeted: false }
    }

    pub fn greeting(&self) -> Option<Vec<u8>> {
        let mut p = Vec::with_capacity(96);
        p.push(0x0a); // protocol version
        p.extend_from_slice(SERVER_VERSION.as_bytes());
        p.push(0);
        p.extend_from_slice(&self.connection_id.to_le_bytes());
        p.extend_from_slice(&self.scramble[..8]); // auth-plugin-data part 1
        p.push(0); // filler
        p.extend_from_slice(&0xf7ffu16.to_le_bytes()); // capability flags (lower)
        p.push(0x21); // charset: utf8_general_ci
        p.extend_from_slice(&0x0002u16.to_le_bytes()); // status: autocommit
        p.extend_from_slice(&0x81ffu16.to_le_bytes()); // capability flags (upper)
        p.push(21); // length of auth-plugin-data
        p.extend_from_slice(&[0u8; 10]); // reserved
        p.extend_from_slice(&self.scramble[8..20]); // auth-plugin-data part 2
        p.push(0);
        p.extend_from_slice(b"mysql_native_password");
        p.push(0);
        Some(packet(0, &p))
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        if self.greeted {
            // Anything after the failed auth is noise; error out and close.
            return Turn::reply(err_packet(3, 1047, "08S01", "Unknown command"))
                .event(EventDraft::malformed("post-auth mysql bytes"))
                .finish();
        }
        self.greeted = true;

        // HandshakeResponse41: 4-byte packet header, 4 capability + 4 max
        // packet + 1 charset + 23 reserved, then NUL-terminated username.
        if input.len() < 4 + 32 + 1 {
            return Turn::reply(err_packet(2, 1043, "08S01", "Bad handshake"))
                .event(EventDraft::malformed("short mysql handshake response"))
                .finish();
        }
        let body = &input[4..];
        let capability_flags = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        let username_bytes: Vec<u8> =
            body[32..].iter().take_while(|b| **b != 0).copied().collect();
        let username = String::from_utf8_lossy(&username_bytes).into_owned();
        let auth_len = body.len().saturating_sub(32 + username_bytes.len() + 1);

        let message =
            format!("Access denied for user '{username}'@'%' (using password: YES)");
        Turn::reply(err_packet(2, 1045, "28000", &message))
            .event(
                EventDraft::new(EventType::AuthAttempt)
                    .field("username", username)
                    .field("capability_flags", format!("{capability_flags:#010x}"))
                    .field("auth_response_len", auth_len.to_string()),
            )
            .finish()
    }
}

/// Wrap a payload in the MySQL packet framing: 3-byte little-endian length
/// plus a sequence id.
fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 4);
    out.push((len & 0xff) as u8);
    out.push(((len >> 8) & 0xff) as u8);
    out.push(((len >> 16) & 0xff) as u8);
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

fn err_packet(seq: u8, code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut p = Vec::with_capacity(message.len() + 9);
    p.push(0xff);
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(sql_state.as_bytes());
    p.extend_from_slice(message.as_bytes());
    packet(seq, &p)
}
