//! Serial-over-LAN payload framing and flow control.
//!
//! SOL packets travel in the same session as IPMI commands but are marked by
//! the SOL bit in the session id and never carry an authcode. There is no
//! request/response matching: data packets are acknowledged by sequence
//! number, and an acknowledgement may accept only part of the data.

use bitflags::bitflags;

use crate::error::{Error, Result};

const SOL_HEADER_LEN: usize = 5;
const SOL_SEQ_MAX: u8 = 0x0F;

bitflags! {
    /// Operation flags sent by the console.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SolControl: u8 {
        /// Refuse the characters of the acknowledged packet.
        const NACK = 0x40;
        /// Assert ring / wake-on-ring.
        const RING_WOR = 0x20;
        /// Generate a serial break.
        const BREAK = 0x10;
        /// Deassert CTS towards the baseboard.
        const DEASSERT_CTS = 0x08;
        /// Deassert DCD/DSR towards the baseboard.
        const DEASSERT_DCD_DSR = 0x04;
        /// Flush the BMC's inbound buffer.
        const FLUSH_INBOUND = 0x02;
        /// Flush the BMC's outbound buffer.
        const FLUSH_OUTBOUND = 0x01;
    }
}

bitflags! {
    /// Status flags reported by the BMC.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SolStatus: u8 {
        /// The acknowledged characters were refused.
        const NACK = 0x40;
        /// Character transfer is temporarily unavailable.
        const TRANSFER_UNAVAILABLE = 0x20;
        /// SOL has been deactivated.
        const DEACTIVATED = 0x10;
        /// Characters were dropped by the BMC.
        const TRANSMIT_OVERRUN = 0x08;
        /// A break was detected on the serial line.
        const BREAK_DETECTED = 0x04;
    }
}

/// One SOL payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolPacket {
    /// Packet sequence number, 1..=15; 0 marks an ACK-only packet.
    pub seq: u8,
    /// Sequence number being acknowledged, 0 when none.
    pub ack_seq: u8,
    /// Characters accepted from the acknowledged packet.
    pub accepted: u8,
    /// Raw operation/status byte.
    pub flags: u8,
    /// Character data.
    pub data: Vec<u8>,
}

impl SolPacket {
    /// The flags byte read as console operations.
    pub fn control(&self) -> SolControl {
        SolControl::from_bits_truncate(self.flags)
    }

    /// The flags byte read as BMC status.
    pub fn status(&self) -> SolStatus {
        SolStatus::from_bits_truncate(self.flags)
    }

    /// An ACK-only packet carries no sequence number of its own.
    pub fn is_ack_only(&self) -> bool {
        self.seq == 0
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SOL_HEADER_LEN + self.data.len());
        out.push(self.seq & SOL_SEQ_MAX);
        out.push(self.ack_seq & SOL_SEQ_MAX);
        out.push(self.accepted);
        out.push(self.flags);
        out.push(0x00);
        out.extend_from_slice(&self.data);
        out
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SOL_HEADER_LEN {
            return Err(Error::Protocol("SOL payload too short"));
        }
        Ok(Self {
            seq: bytes[0] & SOL_SEQ_MAX,
            ack_seq: bytes[1] & SOL_SEQ_MAX,
            accepted: bytes[2],
            flags: bytes[3],
            data: bytes[SOL_HEADER_LEN..].to_vec(),
        })
    }
}

/// Per-session SOL bookkeeping.
#[derive(Debug)]
pub(crate) struct SolState {
    next_seq: u8,
    last_received: Option<(u8, usize)>,
    inbound: Vec<u8>,
}

impl Default for SolState {
    fn default() -> Self {
        Self {
            next_seq: 1,
            last_received: None,
            inbound: Vec::new(),
        }
    }
}

impl SolState {
    /// Next data sequence number, cycling through 1..=15.
    pub(crate) fn next_seq(&mut self) -> u8 {
        let current = self.next_seq;
        self.next_seq = if current >= SOL_SEQ_MAX { 1 } else { current + 1 };
        current
    }

    /// Handle an inbound packet: returns the ACK to send (if any) and queues
    /// the bytes the console has not seen yet.
    pub(crate) fn receive(&mut self, packet: &SolPacket) -> Option<SolPacket> {
        if packet.is_ack_only() {
            return None;
        }

        let fresh = match self.last_received {
            Some((seq, count)) if seq == packet.seq => {
                &packet.data[count.min(packet.data.len())..]
            }
            _ => &packet.data[..],
        };
        self.inbound.extend_from_slice(fresh);
        self.last_received = Some((packet.seq, packet.data.len()));

        Some(SolPacket {
            seq: 0,
            ack_seq: packet.seq,
            accepted: u8::try_from(packet.data.len()).unwrap_or(u8::MAX),
            flags: 0,
            data: Vec::new(),
        })
    }

    pub(crate) fn take_inbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.inbound)
    }

    pub(crate) fn has_inbound(&self) -> bool {
        !self.inbound.is_empty()
    }
}

/// How an inbound packet relates to an outstanding send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SolAck {
    /// Everything outstanding was accepted.
    Complete,
    /// Part was accepted; the tail is queued under a new sequence number.
    Partial { accepted: usize },
    /// The BMC refused the packet; resend it.
    Nack,
    /// Not an acknowledgement of this send.
    Unrelated,
}

/// An outbound SOL data (or control) packet awaiting acknowledgement.
#[derive(Debug)]
pub(crate) struct SolSend {
    seq: u8,
    control: SolControl,
    remaining: Vec<u8>,
}

impl SolSend {
    pub(crate) fn new(state: &mut SolState, data: &[u8], control: SolControl) -> Result<Self> {
        if data.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidArgument("SOL packet exceeds 255 characters"));
        }
        Ok(Self {
            seq: state.next_seq(),
            control,
            remaining: data.to_vec(),
        })
    }

    pub(crate) fn seq(&self) -> u8 {
        self.seq
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.remaining
    }

    pub(crate) fn packet(&self) -> SolPacket {
        SolPacket {
            seq: self.seq,
            ack_seq: 0,
            accepted: 0,
            flags: self.control.bits(),
            data: self.remaining.clone(),
        }
    }

    pub(crate) fn on_packet(&mut self, state: &mut SolState, packet: &SolPacket) -> SolAck {
        if packet.ack_seq != self.seq {
            return SolAck::Unrelated;
        }

        let accepted = usize::from(packet.accepted);
        if packet.status().contains(SolStatus::NACK) && accepted == 0 {
            return SolAck::Nack;
        }

        if accepted > 0 && accepted < self.remaining.len() {
            self.remaining.drain(..accepted);
            self.seq = state.next_seq();
            return SolAck::Partial { accepted };
        }

        self.remaining.clear();
        SolAck::Complete
    }
}
