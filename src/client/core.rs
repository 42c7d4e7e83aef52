use std::time::{Duration, Instant};

use rand::Rng;

use crate::bridge::{self, BridgePath, Unwrapped};
use crate::commands::{ActivateSession, Command};
use crate::crypto;
use crate::error::{Error, Result};
use crate::protocol::{
    CCODE_DUPLICATE_REQUEST, CMD_SEND_MESSAGE, Datagram, NETFN_APP, Segment, SessionHeader,
    decode_datagram, encode_ipmi_packet, encode_ping,
};
use crate::session::Session;
use crate::sol::{SolAck, SolPacket, SolSend};
use crate::tracker::{PendingRequest, RequestTracker};
use crate::types::{AuthType, OemProfile, Pong, Request, Response, SessionState};

/// Completion code for Close Session on an unknown session.
const CCODE_INVALID_SESSION_ID: u8 = 0x87;

/// Sent once before Activate Session when the `intelwv2` profile is active.
const THUMP_FIRST: [u8; 16] = [
    0x07, 0x20, 0x18, 0xC8, 0xC2, 0x01, 0x01, 0x3C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Sent after every request when the `intelwv2` profile is active.
const THUMP: [u8; 10] = *b"thump\0\0\0\0\0";

/// Whether an exchange may be bridged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routing {
    /// Use the session's bridge path once bridging is enabled.
    Session,
    /// Always talk to the BMC itself.
    Direct,
}

/// One request/response exchange, spanning every retry.
#[derive(Debug)]
pub(crate) struct Exchange {
    pub(crate) request: Request,
    path: BridgePath,
    rq_seq: u8,
    pub(crate) attempts: u32,
    pub(crate) started: Instant,
}

impl Exchange {
    fn wire_cmd(&self) -> u8 {
        if self.path.level() > 0 {
            CMD_SEND_MESSAGE
        } else {
            self.request.cmd
        }
    }
}

#[derive(Debug)]
pub(crate) enum Progress {
    Waiting,
    Complete(Response),
}

/// Outcome of an inbound SOL datagram.
#[derive(Debug)]
pub(crate) struct SolInbound {
    /// Framed ACK to send back, if the packet carried data.
    pub(crate) ack: Option<Vec<u8>>,
    pub(crate) outcome: SolAck,
}

#[derive(Debug)]
pub(crate) struct ClientCore {
    pub(crate) session: Session,
    tracker: RequestTracker,
    last_exchange: Instant,
    closed: bool,
}

impl ClientCore {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            tracker: RequestTracker::new(),
            last_exchange: Instant::now(),
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.tracker.clear_all();
        self.session.mark_closed();
        self.closed = true;
    }

    /// Allocate a fresh `rq_seq` and start an exchange.
    pub(crate) fn begin(&mut self, request: Request, routing: Routing) -> Result<Exchange> {
        if self.closed {
            return Err(Error::SessionClosed);
        }

        let path = match routing {
            Routing::Session => self.session.route(),
            Routing::Direct => BridgePath::Direct,
        };
        Ok(Exchange {
            request,
            path,
            rq_seq: self.tracker.next_seq(),
            attempts: 0,
            started: Instant::now(),
        })
    }

    /// Datagrams to send for the next attempt of `exchange`.
    ///
    /// Every attempt reuses `rq_seq` but takes a fresh session sequence
    /// number, so the authcode is recomputed.
    pub(crate) fn attempt(&mut self, exchange: &mut Exchange) -> Result<Vec<Vec<u8>>> {
        exchange.attempts += 1;
        if exchange.attempts > 1 {
            crate::observe::record_retry(exchange.request.cmd, exchange.rq_seq, exchange.attempts);
        }

        let segment = bridge::encode_request(
            &exchange.path,
            self.session.config.local_addr,
            exchange.rq_seq,
            &exchange.request,
        );
        let packet = self.frame_command(&segment)?;
        crate::debug::dump_hex("ipmi request", &packet);

        self.tracker.add(PendingRequest {
            rq_seq: exchange.rq_seq,
            cmd: exchange.wire_cmd(),
            target_cmd: exchange.request.cmd,
            bridging_level: exchange.path.level(),
            bytes: packet.clone(),
        });

        let thump = self.session.oem_active(OemProfile::IntelWv2);
        let mut datagrams = Vec::with_capacity(3);
        if thump
            && self.session.state == SessionState::Activating
            && exchange.request.cmd == ActivateSession::CMD
        {
            datagrams.push(THUMP_FIRST.to_vec());
        }
        datagrams.push(packet);
        if thump {
            datagrams.push(THUMP.to_vec());
        }
        Ok(datagrams)
    }

    fn frame_command(&mut self, segment: &[u8]) -> Result<Vec<u8>> {
        let auth_type = self.session.wire_auth_type();
        let seq = self.session.allocate_out_seq();
        let session_id = self.session.session_id;
        let auth_code = crypto::auth_code(
            auth_type,
            &self.session.config.password,
            session_id,
            seq,
            segment,
        )?;

        encode_ipmi_packet(
            &SessionHeader {
                auth_type: auth_type.as_u8(),
                seq,
                session_id,
                auth_code,
            },
            segment,
        )
    }

    /// Classify one inbound datagram for `exchange`; anything that is not
    /// the awaited answer is dropped.
    pub(crate) fn on_datagram(&mut self, exchange: &Exchange, bytes: &[u8]) -> Progress {
        crate::debug::dump_hex("ipmi response", bytes);

        let (header, payload) = match decode_datagram(bytes) {
            Ok(Datagram::Ipmi { header, payload }) => (header, payload),
            Ok(Datagram::Pong(_)) => return discard("unsolicited pong"),
            Err(_) => return discard("malformed datagram"),
        };

        if self.session.active {
            if header.session_id == self.session.sol_session_id() {
                return discard("SOL payload during command exchange");
            }
            if header.session_id != self.session.session_id {
                return discard("foreign session id");
            }
        }

        let Ok(segment) = Segment::decode(&payload) else {
            return discard("bad message segment");
        };

        let Some(pending) = self.tracker.lookup(segment.seq, exchange.wire_cmd()) else {
            return discard("no pending request");
        };
        let levels = pending.bridging_level;
        let (netfn, cmd) = if levels > 0 {
            (NETFN_APP, pending.cmd)
        } else {
            (exchange.request.netfn, pending.target_cmd)
        };
        if segment.seq != exchange.rq_seq || segment.cmd != cmd || segment.netfn != (netfn | 0x01)
        {
            return discard("unmatched response");
        }

        match bridge::unwrap_response(segment, levels) {
            Ok(Unwrapped::Pending { levels }) => {
                if let Some(pending) = self.tracker.lookup_mut(exchange.rq_seq) {
                    pending.bridging_level = levels;
                }
                Progress::Waiting
            }
            Ok(Unwrapped::Complete(response))
                if response.completion_code == CCODE_DUPLICATE_REQUEST =>
            {
                discard("duplicate request completion code")
            }
            Ok(Unwrapped::Complete(response)) => Progress::Complete(response),
            Err(_) => discard("bad bridged response"),
        }
    }

    /// End an exchange; the tracker never outlives it.
    pub(crate) fn finish(
        &mut self,
        mode: &'static str,
        exchange: &Exchange,
        result: &Result<Option<Response>>,
    ) {
        let unanswered = self.tracker.remove(exchange.rq_seq, exchange.wire_cmd());
        self.tracker.clear_all();

        let elapsed = exchange.started.elapsed();
        let (netfn, cmd) = (exchange.request.netfn, exchange.request.cmd);
        match result {
            Ok(Some(response)) => {
                self.last_exchange = Instant::now();
                crate::observe::record_ok(mode, netfn, cmd, elapsed, response.completion_code);
            }
            Ok(None) => {
                if let Some(pending) = unanswered {
                    crate::debug::dump_hex("unanswered request", &pending.bytes);
                }
                crate::observe::record_absent(mode, netfn, cmd, elapsed, exchange.attempts);
            }
            Err(err) => crate::observe::record_err(mode, netfn, cmd, elapsed, err),
        }
    }

    pub(crate) fn keepalive_due(&self) -> bool {
        match self.session.config.keepalive {
            Some(interval) => {
                !self.closed && self.session.active && self.last_exchange.elapsed() >= interval
            }
            None => false,
        }
    }

    /// A presence ping with a random tag.
    pub(crate) fn ping_packet(&self) -> (u8, Vec<u8>) {
        let tag = rand::rng().random::<u8>();
        (tag, encode_ping(tag))
    }

    pub(crate) fn match_pong(&self, tag: u8, bytes: &[u8]) -> Option<Pong> {
        match decode_datagram(bytes) {
            Ok(Datagram::Pong(pong)) if pong.tag == tag => Some(pong),
            _ => {
                crate::observe::record_discard("not the awaited pong");
                None
            }
        }
    }

    /// Frame a SOL payload in the active session.
    pub(crate) fn sol_packet(&mut self, packet: &SolPacket) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if !self.session.active {
            return Err(Error::Protocol("SOL requires an active session"));
        }

        let header = SessionHeader {
            auth_type: AuthType::None.as_u8(),
            seq: self.session.allocate_out_seq(),
            session_id: self.session.sol_session_id(),
            auth_code: None,
        };
        let bytes = encode_ipmi_packet(&header, &packet.encode())?;
        crate::debug::dump_hex("sol packet", &bytes);
        Ok(bytes)
    }

    /// Handle an inbound SOL datagram: queue its new bytes, build the ACK
    /// and, when `send` is waiting, match the acknowledgement against it.
    pub(crate) fn sol_inbound(
        &mut self,
        send: Option<&mut SolSend>,
        bytes: &[u8],
    ) -> Result<Option<SolInbound>> {
        crate::debug::dump_hex("sol inbound", bytes);

        let packet = match decode_datagram(bytes) {
            Ok(Datagram::Ipmi { header, payload })
                if header.session_id == self.session.sol_session_id() =>
            {
                match SolPacket::decode(&payload) {
                    Ok(packet) => packet,
                    Err(_) => {
                        crate::observe::record_discard("bad SOL payload");
                        return Ok(None);
                    }
                }
            }
            _ => {
                crate::observe::record_discard("not a SOL datagram");
                return Ok(None);
            }
        };

        let ack = match self.session.sol.receive(&packet) {
            Some(ack) => Some(self.sol_packet(&ack)?),
            None => None,
        };
        let outcome = match send {
            Some(send) => send.on_packet(&mut self.session.sol, &packet),
            None => SolAck::Unrelated,
        };
        Ok(Some(SolInbound { ack, outcome }))
    }
}

fn discard(reason: &'static str) -> Progress {
    crate::observe::record_discard(reason);
    Progress::Waiting
}

/// Interpret the answer to Close Session.
pub(crate) fn close_outcome(response: Option<Response>) -> Result<()> {
    match response {
        Some(response)
            if response.completion_code == 0x00
                || response.completion_code == CCODE_INVALID_SESSION_ID =>
        {
            Ok(())
        }
        Some(response) => Err(Error::CompletionCode {
            completion_code: response.completion_code,
        }),
        // No answer: the session is closed locally regardless.
        None => Ok(()),
    }
}

/// Time left before `deadline`, or `None` once it has passed.
pub(crate) fn time_left(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}
