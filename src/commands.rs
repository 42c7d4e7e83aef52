//! Typed IPMI commands used by the client and available to callers.

use crate::error::{Error, Result};
use crate::protocol::NETFN_APP;
use crate::types::{
    ActivatedSession, AuthType, ChannelAuthCapabilities, DeviceId, PrivilegeLevel, RawResponse,
    Request, SessionChallenge,
};

/// A typed IPMI command (single request/response).
pub trait Command {
    /// Parsed output type.
    type Output;

    /// Network Function (NetFn) for the request.
    const NETFN: u8;

    /// Command number.
    const CMD: u8;

    /// Encode request payload bytes (excluding NetFn/Cmd framing).
    fn request_data(&self) -> Vec<u8>;

    /// Parse a raw response into the typed output.
    fn parse_response(&self, response: RawResponse) -> Result<Self::Output>;

    /// The untyped request for this command.
    fn request(&self) -> Request {
        Request::new(Self::NETFN, Self::CMD, self.request_data())
    }
}

fn ok_data(response: &RawResponse) -> Result<&[u8]> {
    if response.completion_code != 0x00 {
        return Err(Error::CompletionCode {
            completion_code: response.completion_code,
        });
    }
    Ok(&response.data)
}

/// Channel number meaning "the channel this request arrived on".
pub const CURRENT_CHANNEL: u8 = 0x0E;

/// `Get Device ID` (App NetFn, cmd 0x01).
#[derive(Debug, Clone, Copy)]
pub struct GetDeviceId;

impl Command for GetDeviceId {
    type Output = DeviceId;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x01;

    fn request_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_device_id(ok_data(&response)?)
    }
}

/// `Get Channel Authentication Capabilities` (App NetFn, cmd 0x38).
#[derive(Debug, Clone, Copy)]
pub struct GetChannelAuthCapabilities {
    /// Channel number (low nibble).
    pub channel: u8,
    /// Privilege to query.
    pub privilege: PrivilegeLevel,
}

impl GetChannelAuthCapabilities {
    /// Query the capabilities of the channel the request arrives on.
    pub fn new(privilege: PrivilegeLevel) -> Self {
        Self {
            channel: CURRENT_CHANNEL,
            privilege,
        }
    }
}

impl Command for GetChannelAuthCapabilities {
    type Output = ChannelAuthCapabilities;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x38;

    fn request_data(&self) -> Vec<u8> {
        vec![self.channel & 0x0F, self.privilege.as_u8() & 0x0F]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        parse_channel_auth_capabilities(ok_data(&response)?)
    }
}

/// `Get Session Challenge` (App NetFn, cmd 0x39).
#[derive(Debug, Clone, Copy)]
pub struct GetSessionChallenge {
    /// Authtype the session will use.
    pub auth_type: AuthType,
    /// Zero-padded user name.
    pub username: [u8; 16],
}

impl Command for GetSessionChallenge {
    type Output = SessionChallenge;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x39;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(17);
        data.push(self.auth_type.as_u8());
        data.extend_from_slice(&self.username);
        data
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        match response.completion_code {
            0x81 => return Err(Error::AuthenticationFailed("invalid user name")),
            0x82 => return Err(Error::AuthenticationFailed("null user name not enabled")),
            _ => {}
        }
        parse_session_challenge(ok_data(&response)?)
    }
}

/// `Activate Session` (App NetFn, cmd 0x3A).
#[derive(Debug, Clone, Copy)]
pub struct ActivateSession {
    /// Authtype for the session.
    pub auth_type: AuthType,
    /// Maximum privilege requested for the session.
    pub privilege: PrivilegeLevel,
    /// Challenge string from `Get Session Challenge`.
    pub challenge: [u8; 16],
    /// First sequence number the BMC will use towards the console.
    pub initial_outbound_seq: u32,
}

impl Command for ActivateSession {
    type Output = ActivatedSession;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3A;

    fn request_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(22);
        data.push(self.auth_type.as_u8());
        data.push(self.privilege.as_u8());
        data.extend_from_slice(&self.challenge);
        data.extend_from_slice(&self.initial_outbound_seq.to_le_bytes());
        data
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let reason = match response.completion_code {
            0x81 => Some("no session slot available"),
            0x82 => Some("no slot available for given user"),
            0x83 => Some("no slot available for user's maximum privilege"),
            0x84 => Some("session sequence number out of range"),
            0x85 => Some("invalid session id in request"),
            0x86 => Some("requested privilege exceeds user or channel limit"),
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(Error::AuthenticationFailed(reason));
        }
        parse_activated_session(ok_data(&response)?)
    }
}

/// `Set Session Privilege Level` (App NetFn, cmd 0x3B).
#[derive(Debug, Clone, Copy)]
pub struct SetSessionPrivilegeLevel {
    /// Privilege to switch to.
    pub privilege: PrivilegeLevel,
}

impl Command for SetSessionPrivilegeLevel {
    /// New privilege level reported by the BMC.
    type Output = u8;
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3B;

    fn request_data(&self) -> Vec<u8> {
        vec![self.privilege.as_u8()]
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let data = ok_data(&response)?;
        data.first()
            .map(|b| b & 0x0F)
            .ok_or(Error::Protocol("Set Session Privilege Level response too short"))
    }
}

/// `Close Session` (App NetFn, cmd 0x3C).
#[derive(Debug, Clone, Copy)]
pub struct CloseSession {
    /// Session to close.
    pub session_id: u32,
}

impl Command for CloseSession {
    type Output = ();
    const NETFN: u8 = NETFN_APP;
    const CMD: u8 = 0x3C;

    fn request_data(&self) -> Vec<u8> {
        self.session_id.to_le_bytes().to_vec()
    }

    fn parse_response(&self, response: RawResponse) -> Result<Self::Output> {
        let _ = ok_data(&response)?;
        Ok(())
    }
}

pub(crate) fn parse_device_id(data: &[u8]) -> Result<DeviceId> {
    // Aux firmware revision (bytes 11..15) is optional.
    if data.len() < 11 {
        return Err(Error::Protocol("Get Device ID response too short"));
    }

    Ok(DeviceId {
        device_id: data[0],
        device_revision: data[1] & 0x0F,
        firmware_major: data[2] & 0x7F,
        firmware_minor: data[3],
        ipmi_version: data[4],
        manufacturer_id: u32::from(data[6])
            | (u32::from(data[7]) << 8)
            | (u32::from(data[8] & 0x0F) << 16),
        product_id: u16::from(data[9]) | (u16::from(data[10]) << 8),
    })
}

pub(crate) fn parse_channel_auth_capabilities(data: &[u8]) -> Result<ChannelAuthCapabilities> {
    if data.len() < 8 {
        return Err(Error::Protocol(
            "Get Channel Authentication Capabilities response too short",
        ));
    }

    let enabled_auth_types = data[1] & 0x3F;
    let has_oem = enabled_auth_types & AuthType::Oem.support_bit() != 0;
    let (oem_id, oem_aux_data) = if has_oem {
        let id = u32::from(data[4]) | (u32::from(data[5]) << 8) | (u32::from(data[6]) << 16);
        (Some(id), Some(data[7]))
    } else {
        (None, None)
    };

    Ok(ChannelAuthCapabilities {
        channel_number: data[0] & 0x0F,
        enabled_auth_types,
        per_message_auth_disabled: data[2] & 0x10 != 0,
        user_level_auth_disabled: data[2] & 0x08 != 0,
        non_null_usernames: data[2] & 0x04 != 0,
        null_usernames: data[2] & 0x02 != 0,
        anonymous_login_enabled: data[2] & 0x01 != 0,
        oem_id,
        oem_aux_data,
    })
}

pub(crate) fn parse_session_challenge(data: &[u8]) -> Result<SessionChallenge> {
    if data.len() < 20 {
        return Err(Error::Protocol("Get Session Challenge response too short"));
    }

    let mut challenge = [0u8; 16];
    challenge.copy_from_slice(&data[4..20]);
    Ok(SessionChallenge {
        temporary_session_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        challenge,
    })
}

pub(crate) fn parse_activated_session(data: &[u8]) -> Result<ActivatedSession> {
    if data.len() < 10 {
        return Err(Error::Protocol("Activate Session response too short"));
    }

    Ok(ActivatedSession {
        auth_type: data[0] & 0x0F,
        session_id: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
        initial_inbound_seq: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
        max_privilege: data[9] & 0x0F,
    })
}
