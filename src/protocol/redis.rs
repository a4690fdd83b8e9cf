//! Redis emulation: minimal RESP parsing (inline and array forms),
//! protocol-correct status/error replies, command and argument capture.

use super::{EventDraft, Turn};
use crate::event::EventType;

const MAX_COMMANDS_PER_SESSION: u32 = 50;
const MAX_CAPTURED_ARGS: usize = 8;

pub struct Redis {
    commands_seen: u32,
}

impl Redis {
    pub fn new() -> Self {
        Self { commands_seen: 0 }
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        let Some(args) = parse_resp(input) else {
            return Turn::reply(b"-ERR Protocol error: unbalanced quotes in request\r\n".to_vec())
                .event(EventDraft::malformed("unparseable resp"));
        };
        if args.is_empty() {
            return Turn::default();
        }
        self.commands_seen += 1;

        let command = args[0].to_uppercase();
        let mut draft = EventDraft::new(EventType::Command).field("command", command.clone());
        for (i, arg) in args.iter().skip(1).take(MAX_CAPTURED_ARGS).enumerate() {
            draft = draft.field(&format!("arg{i}"), arg.clone());
        }

        let reply: Vec<u8> = match command.as_str() {
            "PING" => b"+PONG\r\n".to_vec(),
            "QUIT" => b"+OK\r\n".to_vec(),
            "AUTH" => {
                draft.event_type = EventType::AuthAttempt;
                if let Some(pass) = args.last().filter(|_| args.len() > 1) {
                    draft = draft.field("password", pass.clone());
                }
                b"-ERR invalid password\r\n".to_vec()
            }
            "ECHO" => {
                let payload = args.get(1).cloned().unwrap_or_default();
                format!("${}\r\n{}\r\n", payload.len(), payload).into_bytes()
            }
            "INFO" => {
                let body = "# Server\r\nredis_version:5.0.7\r\nos:Linux 4.15.0 x86_64\r\n";
                format!("${}\r\n{}\r\n", body.len(), body).into_bytes()
            }
            "COMMAND" => b"*0\r\n".to_vec(),
            "SELECT" => b"+OK\r\n".to_vec(),
            "CONFIG" | "EVAL" | "SLAVEOF" | "REPLICAOF" | "MODULE" => {
                // Classic redis-abuse commands; deny like a locked-down server.
                b"-ERR unknown command\r\n".to_vec()
            }
            other => format!("-ERR unknown command `{}`\r\n", other.to_lowercase()).into_bytes(),
        };

        let done = command == "QUIT" || self.commands_seen >= MAX_COMMANDS_PER_SESSION;
        let mut turn = Turn::reply(reply).event(draft);
        turn.done = done;
        turn
    }
}

/// Parse one RESP command: either `*N\r\n$len\r\narg\r\n...` or an inline
/// whitespace-separated line. Returns None only when the framing itself is
/// broken.
fn parse_resp(input: &[u8]) -> Option<Vec<String>> {
    if input.is_empty() {
        return Some(Vec::new());
    }
    if input[0] != b'*' {
        // Inline command.
        let line = String::from_utf8_lossy(input);
        return Some(
            line.split_whitespace()
                .map(|s| s.to_string())
                .collect(),
        );
    }

    let text = input;
    let mut pos = 0usize;
    let count = {
        let line = read_line(text, &mut pos)?;
        line.strip_prefix('*')?.parse::<usize>().ok()?
    };
    if count > 64 {
        return None;
    }
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let header = read_line(text, &mut pos)?;
        let len = header.strip_prefix('$')?.parse::<usize>().ok()?;
        if len > 4096 || pos + len > text.len() {
            return None;
        }
        args.push(String::from_utf8_lossy(&text[pos..pos + len]).into_owned());
        pos += len;
        // consume trailing \r\n
        if text.get(pos) == Some(&b'\r') {
            pos += 2;
        }
    }
    Some(args)
}

fn read_line(text: &[u8], pos: &mut usize) -> Option<String> {
    let rest = text.get(*pos..)?;
    let end = rest.iter().position(|b| *b == b'\n')?;
    let line = String::from_utf8_lossy(&rest[..end]).trim_end_matches('\r').to_string();
    *pos += end + 1;
    Some(line)
}
