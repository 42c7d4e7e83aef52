//! A scripted v1.5 BMC behind the public `Transport` trait.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipmi_lan::{Result, Transport};
use md2::Md2;
use md5::{Digest, Md5};

pub const SESSION_ID: u32 = 0x0A0B_0C0D;
pub const TEMP_SESSION_ID: u32 = 0x0111_2222;
pub const SOL_BIT: u32 = 0x1000_0000;

/// One datagram the client sent, as the BMC saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Ping {
        tag: u8,
    },
    Command {
        auth_type: u8,
        seq: u32,
        session_id: u32,
        has_auth_code: bool,
        netfn: u8,
        cmd: u8,
        rq_seq: u8,
        /// Target command of a bridged request.
        inner_cmd: u8,
    },
    Sol {
        seq: u8,
        ack_seq: u8,
        accepted: u8,
        data: Vec<u8>,
    },
    Other(Vec<u8>),
}

impl Sent {
    pub fn cmd(&self) -> Option<u8> {
        match self {
            Self::Command { cmd, .. } => Some(*cmd),
            _ => None,
        }
    }
}

/// How the simulated BMC misbehaves.
#[derive(Debug, Clone)]
pub struct Behaviour {
    /// Password the BMC checks Activate Session authcodes against.
    pub password: Vec<u8>,
    pub answer_ping: bool,
    pub auth_types: u8,
    pub per_message_auth_disabled: bool,
    pub initial_inbound_seq: u32,
    /// Drop the first N requests carrying this command.
    pub drop: HashMap<u8, usize>,
    /// Answer these commands with 0xCF before the real answer.
    pub duplicate_first: Vec<u8>,
    /// Send noise (garbage, foreign session, stale seq) before each answer.
    pub noise: bool,
    /// Acknowledge Send Message first and deliver the answer separately.
    pub bridged_ack_first: bool,
    /// Characters accepted by the first SOL acknowledgement.
    pub sol_first_accept: Option<u8>,
    /// Console output pushed along with the first SOL acknowledgement.
    pub sol_output: Vec<u8>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            password: b"secret".to_vec(),
            answer_ping: true,
            auth_types: 0x17,
            per_message_auth_disabled: false,
            initial_inbound_seq: 0x10,
            drop: HashMap::new(),
            duplicate_first: Vec::new(),
            noise: false,
            bridged_ack_first: false,
            sol_first_accept: None,
            sol_output: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Sim {
    behaviour: Behaviour,
    queue: VecDeque<Vec<u8>>,
    sol_acks: usize,
    sol_received: Arc<Mutex<Vec<u8>>>,
}

pub struct SimBmc {
    sim: Mutex<Sim>,
    log: Arc<Mutex<Vec<Sent>>>,
}

/// Handle kept by the test after the transport moves into the client.
#[derive(Clone)]
pub struct BmcLog {
    sent: Arc<Mutex<Vec<Sent>>>,
    sol_received: Arc<Mutex<Vec<u8>>>,
}

impl BmcLog {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("log").clone()
    }

    /// Console input the BMC accepted, in order.
    pub fn sol_received(&self) -> Vec<u8> {
        self.sol_received.lock().expect("sol").clone()
    }

    pub fn commands(&self) -> Vec<u8> {
        self.sent().iter().filter_map(Sent::cmd).collect()
    }

    pub fn count(&self, cmd: u8) -> usize {
        self.commands().iter().filter(|c| **c == cmd).count()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("log").clear();
    }
}

impl Default for Sim {
    fn default() -> Self {
        Self {
            behaviour: Behaviour::default(),
            queue: VecDeque::new(),
            sol_acks: 0,
            sol_received: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SimBmc {
    pub fn new(behaviour: Behaviour) -> (Self, BmcLog) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sim = Sim {
            behaviour,
            ..Sim::default()
        };
        let handle = BmcLog {
            sent: Arc::clone(&log),
            sol_received: Arc::clone(&sim.sol_received),
        };
        let bmc = Self {
            sim: Mutex::new(sim),
            log,
        };
        (bmc, handle)
    }
}

impl Transport for SimBmc {
    fn send(&self, datagram: &[u8]) -> Result<()> {
        let sent = classify(datagram);
        self.log.lock().expect("log").push(sent.clone());
        let mut sim = self.sim.lock().expect("sim");
        sim.handle(&sent, datagram);
        Ok(())
    }

    fn recv(&self, _timeout: Duration) -> Result<Option<Vec<u8>>> {
        Ok(self.sim.lock().expect("sim").queue.pop_front())
    }
}

impl Sim {
    fn handle(&mut self, sent: &Sent, datagram: &[u8]) {
        match sent {
            Sent::Ping { tag } if self.behaviour.answer_ping => self.queue.push_back(pong(*tag)),
            Sent::Command { cmd, .. } => {
                if let Some(left) = self.behaviour.drop.get_mut(cmd) {
                    if *left > 0 {
                        *left -= 1;
                        return;
                    }
                }
                let (_, payload) = split(datagram);
                if *cmd == 0x3A && !self.activation_authenticated(datagram, &payload) {
                    let segment = decode_segment(&payload);
                    self.queue
                        .push_back(frame(TEMP_SESSION_ID, 0, &respond(&segment, 0x86, &[])));
                    return;
                }
                self.answer(&payload);
            }
            Sent::Sol { seq, data, .. } if *seq != 0 => {
                let accepted = match (self.sol_acks, self.behaviour.sol_first_accept) {
                    (0, Some(n)) => n,
                    _ => data.len() as u8,
                };
                self.sol_received
                    .lock()
                    .expect("sol")
                    .extend_from_slice(&data[..usize::from(accepted).min(data.len())]);
                let output = if self.sol_acks == 0 {
                    self.behaviour.sol_output.clone()
                } else {
                    Vec::new()
                };
                self.sol_acks += 1;
                let mut payload = vec![if output.is_empty() { 0 } else { 3 }, *seq, accepted, 0, 0];
                payload.extend_from_slice(&output);
                self.queue
                    .push_back(frame(SESSION_ID | SOL_BIT, 0, &payload));
            }
            _ => {}
        }
    }

    /// Recompute the Activate Session authcode over the received segment.
    fn activation_authenticated(&self, datagram: &[u8], segment: &[u8]) -> bool {
        let ((auth_type, seq, session_id, has_auth_code), _) = split(datagram);
        let key = pad16(&self.behaviour.password);
        let expected: [u8; 16] = match auth_type {
            0x00 => return !has_auth_code,
            0x04 => key,
            0x01 => keyed::<Md2>(&key, session_id, seq, segment),
            0x02 => keyed::<Md5>(&key, session_id, seq, segment),
            _ => return false,
        };
        datagram[13..29] == expected
    }

    fn answer(&mut self, request: &[u8]) {
        let segment = decode_segment(request);
        let session_id = if segment.cmd == 0x38 || segment.cmd == 0x39 {
            0
        } else if segment.cmd == 0x3A {
            TEMP_SESSION_ID
        } else {
            SESSION_ID
        };

        if self.behaviour.noise && segment.cmd != 0x3C && session_id == SESSION_ID {
            self.queue.push_back(vec![0x06, 0x00, 0xFF]);
            let stale = Segment {
                rq_seq: segment.rq_seq.wrapping_add(1) & 0x3F,
                ..segment.clone()
            };
            self.queue
                .push_back(frame(SESSION_ID ^ 0xFF, 0, &respond(&segment, 0, &[0x20])));
            self.queue
                .push_back(frame(SESSION_ID, 0, &respond(&stale, 0, &[0x20])));
        }
        if self.behaviour.duplicate_first.contains(&segment.cmd) {
            self.queue
                .push_back(frame(session_id, 0, &respond(&segment, 0xCF, &[])));
        }

        let reply = if segment.cmd == 0x34 {
            self.bridged(&segment, session_id)
        } else {
            self.reply(&segment)
        };
        self.queue.push_back(frame(session_id, 0, &reply));
    }

    fn bridged(&mut self, outer: &Segment, session_id: u32) -> Vec<u8> {
        if self.behaviour.bridged_ack_first {
            self.queue
                .push_back(frame(session_id, 0, &respond(outer, 0x00, &[])));
        }
        let inner = decode_segment(&outer.data[1..]);
        let inner_reply = if inner.cmd == 0x34 {
            self.bridged(&inner, session_id)
        } else {
            self.reply(&inner)
        };
        if self.behaviour.bridged_ack_first {
            inner_reply
        } else {
            respond(outer, 0x00, &inner_reply)
        }
    }

    fn reply(&self, segment: &Segment) -> Vec<u8> {
        match self.data_for(segment) {
            Some(data) => respond(segment, 0x00, &data),
            None => respond(segment, 0xC1, &[]),
        }
    }

    fn data_for(&self, segment: &Segment) -> Option<Vec<u8>> {
        let data = match segment.cmd {
            0x01 => vec![
                segment.dest_addr,
                0x01,
                0x02,
                0x10,
                0x51,
                0x00,
                0x57,
                0x01,
                0x00,
                0x34,
                0x12,
            ],
            0x38 => {
                let status = if self.behaviour.per_message_auth_disabled {
                    0x14
                } else {
                    0x04
                };
                vec![0x01, self.behaviour.auth_types, status, 0x01, 0, 0, 0, 0]
            }
            0x39 => {
                let mut data = TEMP_SESSION_ID.to_le_bytes().to_vec();
                data.extend([0x5A; 16]);
                data
            }
            0x3A => {
                let mut data = vec![segment.data[0]];
                data.extend(SESSION_ID.to_le_bytes());
                data.extend(self.behaviour.initial_inbound_seq.to_le_bytes());
                data.push(0x04);
                data
            }
            0x3B => vec![segment.data[0]],
            0x3C => Vec::new(),
            _ => return None,
        };
        Some(data)
    }
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub dest_addr: u8,
    pub netfn: u8,
    pub src_addr: u8,
    pub rq_seq: u8,
    pub cmd: u8,
    pub data: Vec<u8>,
}

pub fn decode_segment(bytes: &[u8]) -> Segment {
    Segment {
        dest_addr: bytes[0],
        netfn: bytes[1] >> 2,
        src_addr: bytes[3],
        rq_seq: bytes[4] >> 2,
        cmd: bytes[5],
        data: bytes[6..bytes.len() - 1].to_vec(),
    }
}

fn pad16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let n = bytes.len().min(16);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn keyed<D: Digest>(key: &[u8; 16], session_id: u32, seq: u32, segment: &[u8]) -> [u8; 16] {
    let mut hasher = D::new();
    hasher.update(key);
    hasher.update(session_id.to_le_bytes());
    hasher.update(segment);
    hasher.update(seq.to_le_bytes());
    hasher.update(key);
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize()[..16]);
    out
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)).wrapping_neg()
}

/// Response segment answering `request`; `data` follows the completion code.
pub fn respond(request: &Segment, completion_code: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![request.src_addr, (request.netfn | 0x01) << 2];
    out.push(checksum(&out));
    out.push(request.dest_addr);
    out.push(request.rq_seq << 2);
    out.push(request.cmd);
    out.push(completion_code);
    out.extend_from_slice(data);
    out.push(checksum(&out[3..]));
    out
}

/// Frame `payload` in an RMCP/IPMI v1.5 packet without authcode.
pub fn frame(session_id: u32, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x06, 0x00, 0xFF, 0x07, 0x00];
    out.extend(seq.to_le_bytes());
    out.extend(session_id.to_le_bytes());
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    out
}

fn pong(tag: u8) -> Vec<u8> {
    let mut out = vec![0x06, 0x00, 0xFF, 0x06];
    out.extend(0x0000_11BEu32.to_be_bytes());
    out.extend([0x40, tag, 0x00, 0x10]);
    out.extend(0x0000_11BEu32.to_be_bytes());
    out.extend([0u8; 4]);
    out.extend([0x81, 0x00]);
    out.extend([0u8; 6]);
    out
}

/// Session header fields and payload of a framed packet.
fn split(datagram: &[u8]) -> ((u8, u32, u32, bool), Vec<u8>) {
    let auth_type = datagram[4];
    let seq = u32::from_le_bytes([datagram[5], datagram[6], datagram[7], datagram[8]]);
    let session_id = u32::from_le_bytes([datagram[9], datagram[10], datagram[11], datagram[12]]);
    let has_auth_code = auth_type != 0;
    let mut offset = 13;
    if has_auth_code {
        offset += 16;
    }
    let len = usize::from(datagram[offset]);
    let payload = datagram[offset + 1..offset + 1 + len].to_vec();
    ((auth_type, seq, session_id, has_auth_code), payload)
}

fn classify(datagram: &[u8]) -> Sent {
    if datagram.len() < 4 || datagram[0] != 0x06 {
        return Sent::Other(datagram.to_vec());
    }
    match datagram[3] {
        0x06 => Sent::Ping { tag: datagram[9] },
        0x07 => {
            let ((auth_type, seq, session_id, has_auth_code), payload) = split(datagram);
            if session_id == SESSION_ID | SOL_BIT {
                return Sent::Sol {
                    seq: payload[0],
                    ack_seq: payload[1],
                    accepted: payload[2],
                    data: payload[5..].to_vec(),
                };
            }
            let segment = decode_segment(&payload);
            let inner_cmd = innermost(&segment).cmd;
            Sent::Command {
                auth_type,
                seq,
                session_id,
                has_auth_code,
                netfn: segment.netfn,
                cmd: segment.cmd,
                rq_seq: segment.rq_seq,
                inner_cmd,
            }
        }
        _ => Sent::Other(datagram.to_vec()),
    }
}

fn innermost(segment: &Segment) -> Segment {
    if segment.cmd == 0x34 && segment.netfn == 0x06 {
        innermost(&decode_segment(&segment.data[1..]))
    } else {
        segment.clone()
    }
}
