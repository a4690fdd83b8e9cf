//! FTP emulation: vsftpd-style banner, line-oriented command loop, credential
//! capture with a per-session login attempt cap. Authentication always fails.

use super::{lossy_lines, EventDraft, Turn};
use crate::event::EventType;

pub const BANNER: &str = "220 FTP server (vsftpd 3.0.3)\r\n";

pub struct Ftp {
    pending_user: Option<String>,
    login_attempts: u32,
    max_login_attempts: u32,
}

impl Ftp {
    pub fn new(max_login_attempts: u32) -> Self {
        Self { pending_user: None, login_attempts: 0, max_login_attempts }
    }

    pub fn greeting(&self) -> Option<Vec<u8>> {
        Some(BANNER.as_bytes().to_vec())
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        let mut turn = Turn::default();
        let mut reply = Vec::new();
        let lines = lossy_lines(input);
        if lines.is_empty() {
            reply.extend_from_slice(b"500 Unknown command.\r\n");
            return Turn { reply: Some(reply), events: vec![EventDraft::malformed("empty ftp line")], done: false };
        }
        for line in lines {
            let upper = line.to_uppercase();
            if upper.starts_with("USER ") {
                self.pending_user = Some(line[5..].trim().to_string());
                reply.extend_from_slice(b"331 Please specify the password.\r\n");
            } else if upper.starts_with("PASS ") {
                let password = line[5..].trim().to_string();
                let username = self.pending_user.take().unwrap_or_default();
                self.login_attempts += 1;
                turn.events.push(
                    EventDraft::new(EventType::AuthAttempt)
                        .field("username", username)
                        .field("password", password),
                );
                if self.login_attempts >= self.max_login_attempts {
                    reply.extend_from_slice(b"421 Too many login failures.\r\n");
                    turn.done = true;
                    break;
                }
                reply.extend_from_slice(b"530 Login incorrect.\r\n");
            } else if upper.starts_with("QUIT") {
                reply.extend_from_slice(b"221 Goodbye.\r\n");
                turn.done = true;
                break;
            } else if upper.starts_with("SYST") {
                turn.events.push(EventDraft::new(EventType::Command).field("command", line.clone()));
                reply.extend_from_slice(b"215 UNIX Type: L8\r\n");
            } else if upper.starts_with("FEAT") {
                turn.events.push(EventDraft::new(EventType::Command).field("command", line.clone()));
                reply.extend_from_slice(b"211 End\r\n");
            } else {
                turn.events.push(EventDraft::new(EventType::Command).field("command", line.clone()));
                reply.extend_from_slice(b"500 Unknown command.\r\n");
            }
        }
        turn.reply = Some(reply);
        turn
    }
}
