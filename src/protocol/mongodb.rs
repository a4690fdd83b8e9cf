//! MongoDB emulation: wire-message header and minimal command-document
//! parsing, answered with a plausible CommandNotFound error document.

use super::{EventDraft, Turn};
use crate::event::EventType;

const OP_REPLY: i32 = 1;
const OP_QUERY: i32 = 2004;
const OP_MSG: i32 = 2013;
const MAX_COMMANDS_PER_SESSION: u32 = 20;

pub struct Mongodb {
    commands_seen: u32,
    reply_id: i32,
}

impl Mongodb {
    pub fn new() -> Self {
        Self { commands_seen: 0, reply_id: 1000 }
    }

    pub fn on_input(&mut self, input: &[u8]) -> Turn {
        if input.len() < 16 {
            return Turn::default().event(EventDraft::malformed("short mongodb header")).finish();
        }
        let request_id = i32::from_le_bytes([input[4], input[5], input[6], input[7]]);
        let opcode = i32::from_le_bytes([input[12], input[13], input[14], input[15]]);

        let command = match opcode {
            OP_MSG => first_key_op_msg(&input[16..]),
            OP_QUERY => first_key_op_query(&input[16..]),
            _ => None,
        };
        self.commands_seen += 1;
        self.reply_id += 1;

        let mut draft = EventDraft::new(EventType::Command).field("opcode", opcode.to_string());
        match &command {
            Some(name) => draft = draft.field("command", name.clone()),
            None => draft = draft.field("malformed", "undecodable command document"),
        }

        let errmsg = match &command {
            Some(name) => format!("no such command: '{name}'"),
            None => "command not found".to_string(),
        };
        let body = error_document(&errmsg);
        let reply = match opcode {
            OP_QUERY => op_reply(self.reply_id, request_id, &body),
            _ => op_msg_reply(self.reply_id, request_id, &body),
        };

        let done = self.commands_seen >= MAX_COMMANDS_PER_SESSION;
        let mut turn = Turn::reply(reply).event(draft);
        turn.done = done;
        turn
    }
}

/// OP_MSG: u32 flag bits, section kind 0, then a BSON document.
fn first_key_op_msg(body: &[u8]) -> Option<String> {
    if body.len() < 5 || body[4] != 0 {
        return None;
    }
    first_bson_key(&body[5..])
}

/// OP_QUERY: u32 flags, cstring collection, two i32s, then the query doc.
fn first_key_op_query(body: &[u8]) -> Option<String> {
    let rest = body.get(4..)?;
    let nul = rest.iter().position(|b| *b == 0)?;
    let doc_start = nul + 1 + 8;
    first_bson_key(rest.get(doc_start..)?)
}

/// First element key of a BSON document: skip the i32 length and the element
/// type byte, read the cstring name.
fn first_bson_key(doc: &[u8]) -> Option<String> {
    if doc.len() < 6 {
        return None;
    }
    let declared = i32::from_le_bytes([doc[0], doc[1], doc[2], doc[3]]);
    if declared < 5 {
        return None;
    }
    let name = doc[5..].iter().take_while(|b| **b != 0).copied().collect::<Vec<u8>>();
    if name.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&name).into_owned())
}

/// BSON {ok: 0.0, errmsg, code: 59, codeName: "CommandNotFound"}.
fn error_document(errmsg: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(errmsg.len() + 64);
    body.push(0x01); // double
    body.extend_from_slice(b"ok\0");
    body.extend_from_slice(&0.0f64.to_le_bytes());
    body.push(0x02); // string
    body.extend_from_slice(b"errmsg\0");
    body.extend_from_slice(&((errmsg.len() + 1) as i32).to_le_bytes());
    body.extend_from_slice(errmsg.as_bytes());
    body.push(0);
    body.push(0x10); // int32
    body.extend_from_slice(b"code\0");
    body.extend_from_slice(&59i32.to_le_bytes());
    body.push(0x02);
    body.extend_from_slice(b"codeName\0");
    body.extend_from_slice(&16i32.to_le_bytes());
    body.extend_from_slice(b"CommandNotFound\0");
    body.push(0); // document terminator

    let mut doc = ((body.len() + 4) as i32).to_le_bytes().to_vec();
    doc.extend_from_slice(&body);
    doc
}

fn header(total_len: usize, request_id: i32, response_to: i32, opcode: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&(total_len as i32).to_le_bytes());
    out.extend_from_slice(&request_id.to_le_bytes());
    out.extend_from_slice(&response_to.to_le_bytes());
    out.extend_from_slice(&opcode.to_le_bytes());
    out
}

fn op_msg_reply(request_id: i32, response_to: i32, doc: &[u8]) -> Vec<u8> {
    let total = 16 + 4 + 1 + doc.len();
    let mut out = header(total, request_id, response_to, OP_MSG);
    out.extend_from_slice(&0u32.to_le_bytes()); // flag bits
    out.push(0); // section kind: body
    out.extend_from_slice(doc);
    out
}

fn op_reply(request_id: i32, response_to: i32, doc: &[u8]) -> Vec<u8> {
    let total = 16 + 20 + doc.len();
    let mut out = header(total, request_id, response_to, OP_REPLY);
    out.extend_from_slice(&2u32.to_le_bytes()); // QueryFailure flag
    out.extend_from_slice(&0u64.to_le_bytes()); // cursor id
    out.extend_from_slice(&0u32.to_le_bytes()); // starting from
    out.extend_from_slice(&1u32.to_le_bytes()); // number returned
    out.extend_from_slice(doc);
    out
}
