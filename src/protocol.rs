use crate::crypto::AUTH_CODE_LEN;
use crate::error::{Error, Result};
use crate::types::Pong;

/// RMCP header values.
const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
const RMCP_SEQ_NO_ACK: u8 = 0xFF;
const RMCP_HEADER_LEN: usize = 4;

/// RMCP message classes (low five bits of the class byte).
pub(crate) mod class {
    /// Alert Standard Format (presence ping/pong).
    pub const ASF: u8 = 0x06;
    /// IPMI message.
    pub const IPMI: u8 = 0x07;
    pub const MASK: u8 = 0x1F;
}

/// ASF message fields for presence discovery.
const ASF_IANA: u32 = 0x0000_11BE;
const ASF_TYPE_PING: u8 = 0x80;
const ASF_TYPE_PONG: u8 = 0x40;
const ASF_HEADER_LEN: usize = 8;
const ASF_PONG_BODY_LEN: usize = 16;

/// Session id marker identifying the Serial-over-LAN payload.
pub(crate) const SOL_SESSION_MARKER: u32 = 0x1000_0000;

/// Well-known addresses on the LAN channel.
pub(crate) const BMC_SLAVE_ADDR: u8 = 0x20;
pub(crate) const REMOTE_SWID: u8 = 0x81;

pub(crate) const NETFN_APP: u8 = 0x06;
pub(crate) const CMD_SEND_MESSAGE: u8 = 0x34;

/// Completion code a BMC returns for a request it already answered.
pub(crate) const CCODE_DUPLICATE_REQUEST: u8 = 0xCF;

/// Minimum encoded message segment: six header bytes plus the trailing checksum.
const SEGMENT_MIN_LEN: usize = 7;

/// Two's complement checksum: the covered bytes plus the result sum to zero.
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}

/// `true` when `bytes` (including their trailing checksum) sum to zero.
pub(crate) fn checksum_ok(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

/// One checksum-protected IPMI message segment.
///
/// Requests and responses share the layout; only the meaning of the two
/// address/LUN pairs is swapped. For responses `body[0]` is the completion code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub dest_addr: u8,
    pub netfn: u8,
    pub dest_lun: u8,
    pub src_addr: u8,
    pub seq: u8,
    pub src_lun: u8,
    pub cmd: u8,
    pub body: Vec<u8>,
}

impl Segment {
    pub(crate) fn encoded_len(&self) -> usize {
        SEGMENT_MIN_LEN + self.body.len()
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        let start = out.len();

        out.push(self.dest_addr);
        out.push((self.netfn << 2) | (self.dest_lun & 0x03));
        let csum1 = checksum(&out[start..]);
        out.push(csum1);

        let tail = out.len();
        out.push(self.src_addr);
        out.push(((self.seq & 0x3F) << 2) | (self.src_lun & 0x03));
        out.push(self.cmd);
        out.extend_from_slice(&self.body);
        let csum2 = checksum(&out[tail..]);
        out.push(csum2);
    }

    /// Parse and validate both checksums of an encoded segment.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SEGMENT_MIN_LEN {
            return Err(Error::Protocol("IPMI message too short"));
        }
        if !checksum_ok(&bytes[..3]) {
            return Err(Error::Protocol("invalid IPMI checksum1"));
        }
        if !checksum_ok(&bytes[3..]) {
            return Err(Error::Protocol("invalid IPMI checksum2"));
        }

        Ok(Self {
            dest_addr: bytes[0],
            netfn: bytes[1] >> 2,
            dest_lun: bytes[1] & 0x03,
            src_addr: bytes[3],
            seq: bytes[4] >> 2,
            src_lun: bytes[4] & 0x03,
            cmd: bytes[5],
            body: bytes[6..bytes.len() - 1].to_vec(),
        })
    }

    /// Completion code of a response segment.
    pub(crate) fn completion_code(&self) -> Result<u8> {
        self.body
            .first()
            .copied()
            .ok_or(Error::Protocol("IPMI response without completion code"))
    }
}

/// IPMI v1.5 session header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionHeader {
    pub auth_type: u8,
    pub seq: u32,
    pub session_id: u32,
    pub auth_code: Option<[u8; AUTH_CODE_LEN]>,
}

fn push_rmcp_header(out: &mut Vec<u8>, class: u8) {
    out.push(RMCP_VERSION);
    out.push(RMCP_RESERVED);
    out.push(RMCP_SEQ_NO_ACK);
    out.push(class);
}

/// Frame `payload` behind an RMCP header and IPMI v1.5 session header.
pub(crate) fn encode_ipmi_packet(header: &SessionHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len: u8 = payload
        .len()
        .try_into()
        .map_err(|_| Error::InvalidArgument("IPMI message exceeds 255 bytes"))?;

    let mut packet = Vec::with_capacity(RMCP_HEADER_LEN + 10 + AUTH_CODE_LEN + payload.len());
    push_rmcp_header(&mut packet, class::IPMI);

    packet.push(header.auth_type);
    packet.extend_from_slice(&header.seq.to_le_bytes());
    packet.extend_from_slice(&header.session_id.to_le_bytes());
    if let Some(code) = &header.auth_code {
        packet.extend_from_slice(code);
    }
    packet.push(payload_len);
    packet.extend_from_slice(payload);

    Ok(packet)
}

/// A classified inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Datagram {
    /// ASF presence pong.
    Pong(Pong),
    /// IPMI session packet; `payload` is the message segment or SOL payload.
    Ipmi {
        header: SessionHeader,
        payload: Vec<u8>,
    },
}

pub(crate) fn decode_datagram(bytes: &[u8]) -> Result<Datagram> {
    if bytes.len() < RMCP_HEADER_LEN {
        return Err(Error::Protocol("packet too short"));
    }
    if bytes[0] != RMCP_VERSION {
        return Err(Error::Protocol("unexpected RMCP version"));
    }

    let body = &bytes[RMCP_HEADER_LEN..];
    match bytes[3] & class::MASK {
        class::ASF => decode_pong(body).map(Datagram::Pong),
        class::IPMI => decode_session_packet(body),
        _ => Err(Error::Protocol("unexpected RMCP class")),
    }
}

fn decode_session_packet(bytes: &[u8]) -> Result<Datagram> {
    // authtype + seq + session id + length
    if bytes.len() < 10 {
        return Err(Error::Protocol("session header too short"));
    }

    let auth_type = bytes[0];
    let seq = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let session_id = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);

    let mut offset = 9;
    let auth_code = if auth_type & 0x0F != 0 {
        let code: [u8; AUTH_CODE_LEN] = bytes
            .get(offset..offset + AUTH_CODE_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or(Error::Protocol("truncated session authcode"))?;
        offset += AUTH_CODE_LEN;
        Some(code)
    } else {
        None
    };

    let payload_len = *bytes
        .get(offset)
        .ok_or(Error::Protocol("missing message length"))? as usize;
    offset += 1;
    let payload = bytes
        .get(offset..offset + payload_len)
        .ok_or(Error::Protocol("truncated IPMI message"))?;

    Ok(Datagram::Ipmi {
        header: SessionHeader {
            auth_type,
            seq,
            session_id,
            auth_code,
        },
        payload: payload.to_vec(),
    })
}

/// Encode an ASF presence ping.
pub(crate) fn encode_ping(tag: u8) -> Vec<u8> {
    let mut packet = Vec::with_capacity(RMCP_HEADER_LEN + ASF_HEADER_LEN);
    push_rmcp_header(&mut packet, class::ASF);
    packet.extend_from_slice(&ASF_IANA.to_be_bytes());
    packet.push(ASF_TYPE_PING);
    packet.push(tag);
    packet.push(0x00);
    packet.push(0x00);
    packet
}

fn decode_pong(bytes: &[u8]) -> Result<Pong> {
    if bytes.len() < ASF_HEADER_LEN + ASF_PONG_BODY_LEN {
        return Err(Error::Protocol("ASF pong too short"));
    }
    if bytes[4] != ASF_TYPE_PONG {
        return Err(Error::Protocol("unexpected ASF message type"));
    }

    let body = &bytes[ASF_HEADER_LEN..];
    Ok(Pong {
        tag: bytes[5],
        iana: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
        oem: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
        supported_entities: body[8],
        supported_interactions: body[9],
    })
}

#[cfg(test)]
pub(crate) fn encode_pong(tag: u8, supported_entities: u8) -> Vec<u8> {
    let mut packet = Vec::new();
    push_rmcp_header(&mut packet, class::ASF);
    packet.extend_from_slice(&ASF_IANA.to_be_bytes());
    packet.push(ASF_TYPE_PONG);
    packet.push(tag);
    packet.push(0x00);
    packet.push(ASF_PONG_BODY_LEN as u8);
    packet.extend_from_slice(&ASF_IANA.to_be_bytes());
    packet.extend_from_slice(&[0x00; 4]);
    packet.push(supported_entities);
    packet.push(0x00);
    packet.extend_from_slice(&[0x00; 6]);
    packet
}
