//! IPMB bridging through nested `Send Message` requests.
//!
//! A bridged request is wrapped once per hop: each wrapper is a complete,
//! checksum-protected Send Message (App, 0x34) request whose data is the
//! channel byte followed by the next inner layer.

use crate::error::{Error, Result};
use crate::protocol::{BMC_SLAVE_ADDR, CMD_SEND_MESSAGE, NETFN_APP, REMOTE_SWID, Segment};
use crate::types::{Request, Response};

/// Send Message channel byte flag asking the BMC to track the request.
const TRACK_REQUEST: u8 = 0x40;

/// One bridge hop: the responder address and the channel it sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeHop {
    /// IPMB slave address of the next responder.
    pub addr: u8,
    /// Channel number the responder is reached through.
    pub channel: u8,
}

impl BridgeHop {
    /// Create a hop.
    pub fn new(addr: u8, channel: u8) -> Self {
        Self { addr, channel }
    }
}

/// Route from the BMC to the device that executes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgePath {
    /// The BMC itself.
    #[default]
    Direct,
    /// A device one bus away from the BMC.
    OneHop(BridgeHop),
    /// A device behind a transit controller.
    TwoHop {
        /// Controller that forwards the request.
        transit: BridgeHop,
        /// Device that executes the request.
        target: BridgeHop,
    },
}

impl BridgePath {
    /// Number of Send Message layers this path adds (`bridging_level`).
    pub fn level(&self) -> u8 {
        match self {
            Self::Direct => 0,
            Self::OneHop(_) => 1,
            Self::TwoHop { .. } => 2,
        }
    }

    fn hops(&self) -> Vec<BridgeHop> {
        match *self {
            Self::Direct => Vec::new(),
            Self::OneHop(target) => vec![target],
            Self::TwoHop { transit, target } => vec![transit, target],
        }
    }
}

/// Encode `request` as the message segment for `path`.
///
/// `local_addr` is the IPMB address the BMC uses as requester on the
/// bridged buses. Every layer carries the same `rq_seq`.
pub(crate) fn encode_request(
    path: &BridgePath,
    local_addr: u8,
    rq_seq: u8,
    request: &Request,
) -> Vec<u8> {
    encode_layer(
        &path.hops(),
        BMC_SLAVE_ADDR,
        REMOTE_SWID,
        local_addr,
        rq_seq,
        request,
    )
    .encode()
}

fn encode_layer(
    hops: &[BridgeHop],
    rs_addr: u8,
    rq_addr: u8,
    local_addr: u8,
    rq_seq: u8,
    request: &Request,
) -> Segment {
    match hops.split_first() {
        None => Segment {
            dest_addr: rs_addr,
            netfn: request.netfn,
            dest_lun: request.lun,
            src_addr: rq_addr,
            seq: rq_seq,
            src_lun: 0,
            cmd: request.cmd,
            body: request.data.clone(),
        },
        Some((hop, rest)) => {
            let inner = encode_layer(rest, hop.addr, local_addr, local_addr, rq_seq, request);

            let mut body = Vec::with_capacity(1 + inner.encoded_len());
            body.push(TRACK_REQUEST | (hop.channel & 0x0F));
            inner.encode_into(&mut body);

            Segment {
                dest_addr: rs_addr,
                netfn: NETFN_APP,
                dest_lun: 0,
                src_addr: rq_addr,
                seq: rq_seq,
                src_lun: 0,
                cmd: CMD_SEND_MESSAGE,
                body,
            }
        }
    }
}

/// Result of stripping Send Message layers from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Unwrapped {
    /// The innermost response (or a failing Send Message layer).
    Complete(Response),
    /// The Send Message layer was acknowledged without an embedded answer;
    /// the answer arrives in a later datagram with `levels` layers left.
    Pending { levels: u8 },
}

/// Strip exactly `levels` Send Message layers from a response segment.
pub(crate) fn unwrap_response(segment: Segment, levels: u8) -> Result<Unwrapped> {
    let mut current = segment;
    let mut remaining = levels;

    while remaining > 0 {
        if current.cmd != CMD_SEND_MESSAGE {
            return Err(Error::Protocol("expected a Send Message response layer"));
        }

        let completion_code = current.completion_code()?;
        if completion_code != 0x00 {
            return into_response(current).map(Unwrapped::Complete);
        }

        remaining -= 1;
        let embedded = &current.body[1..];
        if embedded.is_empty() {
            return Ok(Unwrapped::Pending { levels: remaining });
        }
        current = Segment::decode(embedded)?;
    }

    into_response(current).map(Unwrapped::Complete)
}

fn into_response(segment: Segment) -> Result<Response> {
    let completion_code = segment.completion_code()?;
    let Segment {
        netfn,
        cmd,
        src_lun,
        seq,
        mut body,
        ..
    } = segment;
    body.remove(0);

    Ok(Response {
        netfn,
        cmd,
        lun: src_lun,
        rq_seq: seq,
        completion_code,
        data: body,
    })
}
