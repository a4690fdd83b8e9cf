//! NTP emulation over UDP: answers plain client polls with a bounded mode-4
//! reply and flags mode-6/7 control traffic (monlist and friends, the classic
//! reflection vectors) as amplification requests.

use super::{DatagramTurn, EventDraft};
use crate::event::EventType;
use chrono::Utc;

const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const MODE_CONTROL: u8 = 6;
const MODE_PRIVATE: u8 = 7;
const REQ_MON_GETLIST: u8 = 42;
const REQ_MON_GETLIST_1: u8 = 43;
const UNIX_TO_NTP_EPOCH: u64 = 2_208_988_800;

pub struct Ntp;

impl Ntp {
    pub fn on_datagram(&self, payload: &[u8]) -> DatagramTurn {
        let Some(first) = payload.first() else {
            return DatagramTurn::silent(EventDraft::malformed("empty ntp datagram"));
        };
        let version = (first >> 3) & 0x07;
        let mode = first & 0x07;

        match mode {
            MODE_CLIENT if payload.len() >= 48 => {
                let draft = EventDraft::new(EventType::Probe)
                    .field("mode", "client")
                    .field("version", version.to_string());
                DatagramTurn::with_reply(server_reply(version, payload), draft)
            }
            MODE_PRIVATE => {
                let req_code = payload.get(3).copied().unwrap_or(0);
                let monlist = req_code == REQ_MON_GETLIST || req_code == REQ_MON_GETLIST_1;
                let draft = EventDraft::new(EventType::AmplificationRequest)
                    .field("mode", "private")
                    .field("request_code", req_code.to_string())
                    .field("monlist", monlist.to_string());
                // ntpdc-style error header only: response + error bits, no
                // data items, so the reply stays well under the request size.
                let mut reply = vec![0u8; 8];
                reply[0] = 0xc0 | (version << 3) | MODE_PRIVATE;
                reply[1] = payload.get(1).copied().unwrap_or(0);
                reply[2] = payload.get(2).copied().unwrap_or(0);
                reply[3] = req_code;
                reply[4] = 0x10; // error: authentication failure
                DatagramTurn::with_reply(reply, draft)
            }
            MODE_CONTROL => DatagramTurn::silent(
                EventDraft::new(EventType::AmplificationRequest)
                    .field("mode", "control")
                    .field("version", version.to_string()),
            ),
            _ => DatagramTurn::silent(EventDraft::malformed("non-client ntp packet")),
        }
    }
}

/// 48-byte mode-4 reply echoing the client transmit timestamp as originate.
fn server_reply(version: u8, request: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 48];
    out[0] = (version << 3) | MODE_SERVER;
    out[1] = 2; // stratum
    out[2] = 6; // poll
    out[3] = 0xec_u8; // precision (-20)
    out[12..16].copy_from_slice(b"LOCL");
    // originate timestamp := client transmit timestamp
    out[24..32].copy_from_slice(&request[40..48]);
    let now = (Utc::now().timestamp() as u64 + UNIX_TO_NTP_EPOCH) as u32;
    out[32..36].copy_from_slice(&now.to_be_bytes()); // receive
    out[40..44].copy_from_slice(&now.to_be_bytes()); // transmit
    out
}
