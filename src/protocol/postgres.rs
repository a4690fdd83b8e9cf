//! PostgreSQL emulation: wire protocol 3.0 startup negotiation, SSLRequest
//! refusal, a cleartext password request, and an unconditional 28P01
//! authentication failure.

use super::{EventDraft, Turn};
use crate::event::EventType;

const SSL_REQUEST_CODE: u32 = 80877103;
const PROTOCOL_3_0: u32 = 196608;

enum State {
    Startup,
    AwaitPassword { user: String, database: String },
    Done,
}

pub struct Postgres {
    state: State,
}

impl Postgres {
    pub fn new() -> Self {
        Self { state: State::Startup }
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Startup => self.on_startup(input),
            State::AwaitPassword { user, database } => self.on_password(input, user, database),
            State::Done => Turn::default().event(EventDraft::malformed("post-auth postgres bytes")).finish(),
        }
    }

    fn on_startup(&mut self, input: &[u8]) -> Turn {
        if input.len() < 8 {
            return Turn::default().event(EventDraft::malformed("short postgres startup")).finish();
        }
        let code = u32::from_be_bytes([input[4], input[5], input[6], input[7]]);
        if code == SSL_REQUEST_CODE {
            // Refuse TLS; most scanners fall back to plaintext startup.
            self.state = State::Startup;
            return Turn::reply(b"N".to_vec());
        }
        if code != PROTOCOL_3_0 {
            return Turn::default()
                .event(EventDraft::malformed("unsupported postgres protocol").field(
                    "protocol_code",
                    code.to_string(),
                ))
                .finish();
        }

        // Parameters: NUL-terminated key/value pairs after the 8-byte prefix.
        let mut user = String::new();
        let mut database = String::new();
        let mut application = String::new();
        let mut parts = input[8..].split(|b| *b == 0);
        while let (Some(k), Some(v)) = (parts.next(), parts.next()) {
            if k.is_empty() {
                break;
            }
            let key = String::from_utf8_lossy(k);
            let value = String::from_utf8_lossy(v).into_owned();
            match key.as_ref() {
                "user" => user = value,
                "database" => database = value,
                "application_name" => application = value,
                _ => {}
            }
        }

        self.state = State::AwaitPassword { user: user.clone(), database: database.clone() };
        let mut turn = Turn::reply(auth_cleartext_request());
        let mut draft = EventDraft::new(EventType::Probe)
            .field("user", user)
            .field("database", database);
        if !application.is_empty() {
            draft = draft.field("application_name", application);
        }
        turn.events.push(draft);
        turn
    }

    fn on_password(&mut self, input: &[u8], user: String, database: String) -> Turn {
        let password = if input.first() == Some(&b'p') && input.len() > 5 {
            String::from_utf8_lossy(
                input[5..].split(|b| *b == 0).next().unwrap_or_default(),
            )
            .into_owned()
        } else {
            return Turn::reply(error_response(&user))
                .event(EventDraft::malformed("expected postgres password message"))
                .finish();
        };
        Turn::reply(error_response(&user))
            .event(
                EventDraft::new(EventType::AuthAttempt)
                    .field("username", user)
                    .field("database", database)
                    .field("password", password),
            )
            .finish()
    }
}

/// AuthenticationCleartextPassword: 'R', length 8, code 3.
fn auth_cleartext_request() -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(b'R');
    out.extend_from_slice(&8u32.to_be_bytes());
    out.extend_from_slice(&3u32.to_be_bytes());
    out
}

/// ErrorResponse with SQLSTATE 28P01.
fn error_response(user: &str) -> Vec<u8> {
    let message = format!("password authentication failed for user \"{user}\"");
    let mut body = Vec::with_capacity(message.len() + 32);
    for (tag, value) in [
        (b'S', "FATAL"),
        (b'V', "FATAL"),
        (b'C', "28P01"),
        (b'M', message.as_str()),
    ] {
        body.push(tag);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(b'E');
    out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup(pairs: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&PROTOCOL_3_0.to_be_bytes());
        for (k, v) in pairs {
            body.extend_from_slice(k.as_bytes());
            body.push(0);
            body.extend_from_slice(v.as_bytes());
            body.push(0);
        }
        body.push(0);
        let mut msg = ((body.len() + 4) as u32).to_be_bytes().to_vec();
        msg.extend_from_slice(&body);
        msg
    }

    #[test]
    fn ssl_request_is_refused_then_startup_proceeds() {
        let mut h = Postgres::new();
        let mut req = 8u32.to_be_bytes().to_vec();
        req.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
        let turn = h.on_input(&req);
        assert_eq!(turn.reply.unwrap(), b"N");
        assert!(!turn.done);

        let turn = h.on_input(&startup(&[("user", "postgres"), ("database", "postgres")]));
        let reply = turn.reply.unwrap();
        assert_eq!(reply[0], b'R');
        assert_eq!(u32::from_be_bytes([reply[5], reply[6], reply[7], reply[8]]), 3);
    }

    #[test]
    fn password_attempt_is_captured_and_fails() {
        let mut h = Postgres::new();
        h.on_input(&startup(&[("user", "admin"), ("database", "prod")]));
        let mut pw = vec![b'p'];
        pw.extend_from_slice(&10u32.to_be_bytes());
        pw.extend_from_slice(b"secret\0");
        let turn = h.on_input(&pw);
        assert!(turn.done);
        let ev = &turn.events[0];
        assert_eq!(ev.event_type, EventType::AuthAttempt);
        assert_eq!(ev.fields["username"], "admin");
        assert_eq!(ev.fields["database"], "prod");
        assert_eq!(ev.fields["password"], "secret");
        let reply = turn.reply.unwrap();
        assert_eq!(reply[0], b'E');
        assert!(reply.windows(5).any(|w| w == b"28P01"));
    }

    #[test]
    fn wrong_protocol_version_degrades() {
        let mut h = Postgres::new();
        let mut msg = 8u32.to_be_bytes().to_vec();
        msg.extend_from_slice(&65536u32.to_be_bytes());
        let turn = h.on_input(&msg);
        assert!(turn.done);
        assert!(turn.events[0].fields.contains_key("malformed"));
    }

    #[test]
    fn short_input_degrades() {
        let mut h = Postgres::new();
        let turn = h.on_input(&[0x00, 0x01]);
        assert!(turn.done);
        assert!(turn.events[0].fields.contains_key("malformed"));
    }
}
