use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// The privilege level requested for the IPMI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
    /// OEM-defined privilege.
    Oem = 0x05,
}

impl PrivilegeLevel {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }
}

/// IPMI v1.5 session authentication type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthType {
    /// No authentication code.
    None = 0x00,
    /// MD2 keyed digest.
    Md2 = 0x01,
    /// MD5 keyed digest.
    Md5 = 0x02,
    /// Straight (clear text) password.
    Password = 0x04,
    /// OEM proprietary.
    Oem = 0x05,
}

impl AuthType {
    /// Preference order used when the caller does not pin an authtype.
    pub(crate) const PREFERENCE: [AuthType; 4] =
        [AuthType::Md5, AuthType::Md2, AuthType::Password, AuthType::None];

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    /// Bit of this authtype in the Get Channel Authentication Capabilities bitmap.
    pub(crate) fn support_bit(self) -> u8 {
        1 << self.as_u8()
    }
}

/// Retry policy applied to every request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Send attempts per request, including the first.
    pub attempts: u32,
    /// How long each attempt waits for a matching datagram.
    pub timeout: Duration,
    /// Pause between a timed-out attempt and the next one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            timeout: Duration::from_secs(2),
            backoff: Duration::ZERO,
        }
    }
}

/// Firmware quirks that change what goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OemProfile {
    /// Intel Westville 2 (`intelwv2`): extra "thump" datagrams around sends.
    IntelWv2,
    /// Intel 82571 serial-port-over-LAN NIC (`i82571spt`): no presence ping.
    Intel82571Spt,
}

impl OemProfile {
    /// Short profile name.
    pub fn name(self) -> &'static str {
        match self {
            Self::IntelWv2 => "intelwv2",
            Self::Intel82571Spt => "i82571spt",
        }
    }
}

impl FromStr for OemProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "intelwv2" => Ok(Self::IntelWv2),
            "i82571spt" => Ok(Self::Intel82571Spt),
            _ => Err(Error::InvalidArgument("unknown OEM profile")),
        }
    }
}

/// Lifecycle state of a LAN session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; also the terminal state.
    Closed,
    /// Waiting for an ASF presence pong.
    Ping,
    /// Querying channel authentication capabilities.
    AuthCapabilities,
    /// Requesting a session challenge.
    Challenge,
    /// Activating the session.
    Activating,
    /// Raising the session privilege level.
    PrivilegeRaise,
    /// Session established; application traffic may flow.
    Active,
    /// Close Session in progress.
    Closing,
}

/// A logical IPMI request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Network function (request form, even).
    pub netfn: u8,
    /// Command number.
    pub cmd: u8,
    /// Logical unit number (0..=3).
    pub lun: u8,
    /// Request data bytes.
    pub data: Vec<u8>,
}

impl Request {
    /// Create a request for LUN 0.
    pub fn new(netfn: u8, cmd: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            netfn,
            cmd,
            lun: 0,
            data: data.into(),
        }
    }

    /// Address a different logical unit.
    pub fn with_lun(mut self, lun: u8) -> Self {
        self.lun = lun & 0x03;
        self
    }
}

/// A decoded IPMI response together with its message header fields.
#[derive(Clone, PartialEq, Eq)]
pub struct Response {
    /// Network function (response form, odd).
    pub netfn: u8,
    /// Command number.
    pub cmd: u8,
    /// Logical unit number.
    pub lun: u8,
    /// Requester sequence number echoed by the responder.
    pub rq_seq: u8,
    /// IPMI completion code.
    pub completion_code: u8,
    /// Payload bytes after the completion code.
    pub data: Vec<u8>,
}

impl Response {
    /// `true` when the completion code is 0x00.
    pub fn is_success(&self) -> bool {
        self.completion_code == 0x00
    }

    /// Drop header fields, keeping completion code and data.
    pub fn into_raw(self) -> RawResponse {
        RawResponse {
            completion_code: self.completion_code,
            data: self.data,
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("netfn", &format_args!("{:#04x}", self.netfn))
            .field("cmd", &format_args!("{:#04x}", self.cmd))
            .field("rq_seq", &self.rq_seq)
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// A raw IPMI response.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// IPMI completion code.
    pub completion_code: u8,
    /// Payload bytes after the completion code.
    pub data: Vec<u8>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field(
                "completion_code",
                &format_args!("{:#04x}", self.completion_code),
            )
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Parsed response for the `Get Device ID` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (lower 4 bits are the revision).
    pub device_revision: u8,
    /// Firmware major revision.
    pub firmware_major: u8,
    /// Firmware minor revision.
    pub firmware_minor: u8,
    /// IPMI version as BCD (e.g. 0x51 for 1.5).
    pub ipmi_version: u8,
    /// Manufacturer ID (24-bit, least-significant byte first).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
}

/// Parsed response for `Get Channel Authentication Capabilities`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAuthCapabilities {
    /// Channel number.
    pub channel_number: u8,
    /// Supported authentication types (bitmask, bit N = authtype N).
    pub enabled_auth_types: u8,
    /// Per-message authentication is disabled when true.
    pub per_message_auth_disabled: bool,
    /// User-level authentication is disabled when true.
    pub user_level_auth_disabled: bool,
    /// One or more non-null user names exist.
    pub non_null_usernames: bool,
    /// One or more null user names with non-null passwords exist.
    pub null_usernames: bool,
    /// Anonymous login (null user/null password) is enabled.
    pub anonymous_login_enabled: bool,
    /// OEM IANA enterprise number for OEM auth types, if present.
    pub oem_id: Option<u32>,
    /// OEM auxiliary data for OEM auth types, if present.
    pub oem_aux_data: Option<u8>,
}

impl ChannelAuthCapabilities {
    /// Whether the channel advertises the given authtype.
    pub fn supports(&self, auth_type: AuthType) -> bool {
        self.enabled_auth_types & auth_type.support_bit() != 0
    }
}

/// Parsed response for `Get Session Challenge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChallenge {
    /// Temporary session id used until activation.
    pub temporary_session_id: u32,
    /// Challenge string to echo in Activate Session.
    pub challenge: [u8; 16],
}

/// Parsed response for `Activate Session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedSession {
    /// Authtype the BMC selected for the remainder of the session.
    pub auth_type: u8,
    /// Permanent session id.
    pub session_id: u32,
    /// First session sequence number the console must use.
    pub initial_inbound_seq: u32,
    /// Maximum privilege allowed for this session.
    pub max_privilege: u8,
}

/// ASF presence pong contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    /// Message tag echoed from the ping.
    pub tag: u8,
    /// IANA enterprise number of the responder.
    pub iana: u32,
    /// OEM-defined value.
    pub oem: u32,
    /// Supported entities bitmap (bit 7: IPMI supported).
    pub supported_entities: u8,
    /// Supported interactions bitmap.
    pub supported_interactions: u8,
}

impl Pong {
    /// The responder reports IPMI support.
    pub fn supports_ipmi(&self) -> bool {
        self.supported_entities & 0x80 != 0
    }
}
