//! Session state and the v1.5 session-establishment handshake.
//!
//! The handshake is a sans-IO state machine: it hands the driver a [`Step`]
//! to perform and is fed the outcome. Both the blocking and the tokio client
//! run the same machine.

use std::time::Duration;

use rand::Rng;

use crate::bridge::BridgePath;
use crate::commands::{
    ActivateSession, Command, GetChannelAuthCapabilities, GetSessionChallenge,
    SetSessionPrivilegeLevel,
};
use crate::crypto::{AUTH_CODE_LEN, SecretBytes};
use crate::error::{Error, Result};
use crate::protocol::{BMC_SLAVE_ADDR, SOL_SESSION_MARKER};
use crate::sol::SolState;
use crate::types::{
    ActivatedSession, AuthType, ChannelAuthCapabilities, OemProfile, PrivilegeLevel, Pong,
    Request, Response, RetryPolicy, SessionState,
};

/// Pause before the single retry of Get Channel Authentication Capabilities.
pub(crate) const AUTH_CAPS_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Caller-supplied session parameters.
#[derive(Debug, Clone)]
pub(crate) struct SessionConfig {
    pub(crate) username: [u8; AUTH_CODE_LEN],
    pub(crate) password: SecretBytes,
    pub(crate) privilege: PrivilegeLevel,
    pub(crate) auth_type: Option<AuthType>,
    pub(crate) retry: RetryPolicy,
    pub(crate) ping: bool,
    pub(crate) bridge: BridgePath,
    pub(crate) local_addr: u8,
    pub(crate) oem: Option<OemProfile>,
    pub(crate) oem_challenge: Option<[u8; AUTH_CODE_LEN]>,
    pub(crate) keepalive: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: [0u8; AUTH_CODE_LEN],
            password: SecretBytes::new(Vec::new()),
            privilege: PrivilegeLevel::Administrator,
            auth_type: None,
            retry: RetryPolicy::default(),
            ping: true,
            bridge: BridgePath::Direct,
            local_addr: BMC_SLAVE_ADDR,
            oem: None,
            oem_challenge: None,
            keepalive: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) state: SessionState,
    /// Temporary id during activation, permanent id afterwards.
    pub(crate) session_id: u32,
    pub(crate) challenge: [u8; AUTH_CODE_LEN],
    pub(crate) auth_type: AuthType,
    pub(crate) per_message_auth_disabled: bool,
    pub(crate) max_privilege: u8,
    pub(crate) active: bool,
    pub(crate) bridging: bool,
    pub(crate) abort: bool,
    pub(crate) sol: SolState,
    next_out_seq: u32,
}

impl Session {
    pub(crate) fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Closed,
            session_id: 0,
            challenge: [0u8; AUTH_CODE_LEN],
            auth_type: AuthType::None,
            per_message_auth_disabled: false,
            max_privilege: 0,
            active: false,
            bridging: false,
            abort: false,
            sol: SolState::default(),
            next_out_seq: 0,
        }
    }

    pub(crate) fn oem_active(&self, profile: OemProfile) -> bool {
        self.config.oem == Some(profile)
    }

    pub(crate) fn enter(&mut self, state: SessionState) {
        self.state = state;
        crate::observe::record_state(state);
    }

    /// Session sequence number for the next outbound packet.
    ///
    /// Always 0 before activation; never 0 afterwards.
    pub(crate) fn allocate_out_seq(&mut self) -> u32 {
        if !self.active {
            return 0;
        }
        let current = self.next_out_seq;
        self.next_out_seq = match self.next_out_seq.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        current
    }

    /// Authtype carried in the header of the next command packet.
    pub(crate) fn wire_auth_type(&self) -> AuthType {
        if self.state == SessionState::Activating {
            return self.auth_type;
        }
        if self.active && !self.per_message_auth_disabled {
            return self.auth_type;
        }
        AuthType::None
    }

    pub(crate) fn sol_session_id(&self) -> u32 {
        self.session_id | SOL_SESSION_MARKER
    }

    /// Bridge path applied to application requests.
    pub(crate) fn route(&self) -> BridgePath {
        if self.bridging {
            self.config.bridge
        } else {
            BridgePath::Direct
        }
    }

    fn activate(&mut self, activated: &ActivatedSession) {
        self.session_id = activated.session_id;
        self.max_privilege = activated.max_privilege;
        self.next_out_seq = match activated.initial_inbound_seq {
            0 => 1,
            seq => seq,
        };
        self.active = true;
    }

    pub(crate) fn mark_closed(&mut self) {
        self.active = false;
        self.bridging = false;
        self.enter(SessionState::Closed);
    }
}

/// Next action the driver must perform for the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Send an ASF presence ping and report the pong via [`Handshake::on_pong`].
    Ping,
    /// Sleep, then call [`Handshake::resume`].
    Pause(Duration),
    /// Run a direct request/response exchange and report it via
    /// [`Handshake::on_response`].
    Send(Request),
    /// The session is active.
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct Handshake {
    auth_caps_retried: bool,
}

impl Handshake {
    pub(crate) fn start(&mut self, session: &mut Session) -> Step {
        if session.config.ping && !session.oem_active(OemProfile::Intel82571Spt) {
            session.enter(SessionState::Ping);
            return Step::Ping;
        }
        self.auth_capabilities(session)
    }

    /// A missing or negative pong is logged and otherwise ignored.
    pub(crate) fn on_pong(&mut self, session: &mut Session, pong: Option<Pong>) -> Step {
        crate::observe::record_pong(pong.is_some(), pong.is_some_and(|p| p.supports_ipmi()));
        self.auth_capabilities(session)
    }

    pub(crate) fn resume(&mut self, session: &mut Session) -> Step {
        self.auth_capabilities(session)
    }

    fn auth_capabilities(&mut self, session: &mut Session) -> Step {
        session.enter(SessionState::AuthCapabilities);
        Step::Send(GetChannelAuthCapabilities::new(session.config.privilege).request())
    }

    pub(crate) fn on_response(
        &mut self,
        session: &mut Session,
        response: Option<Response>,
    ) -> Result<Step> {
        match session.state {
            SessionState::AuthCapabilities => {
                let Some(response) = response else {
                    if self.auth_caps_retried {
                        return Err(Error::Timeout);
                    }
                    self.auth_caps_retried = true;
                    return Ok(Step::Pause(AUTH_CAPS_RETRY_PAUSE));
                };
                let caps = GetChannelAuthCapabilities::new(session.config.privilege)
                    .parse_response(response.into_raw())?;
                session.auth_type = select_auth_type(session.config.auth_type, &caps)?;
                session.per_message_auth_disabled = caps.per_message_auth_disabled;

                session.enter(SessionState::Challenge);
                Ok(Step::Send(
                    GetSessionChallenge {
                        auth_type: session.auth_type,
                        username: session.config.username,
                    }
                    .request(),
                ))
            }
            SessionState::Challenge => {
                let response = response.ok_or(Error::Timeout)?;
                let challenge = GetSessionChallenge {
                    auth_type: session.auth_type,
                    username: session.config.username,
                }
                .parse_response(response.into_raw())?;
                session.session_id = challenge.temporary_session_id;
                session.challenge = challenge.challenge;

                session.enter(SessionState::Activating);
                Ok(Step::Send(activate_command(session).request()))
            }
            SessionState::Activating => {
                let response = response.ok_or(Error::Timeout)?;
                let activated = activate_command(session).parse_response(response.into_raw())?;
                if activated.auth_type != session.auth_type.as_u8() {
                    return Err(Error::Protocol("Activate Session returned a different authtype"));
                }
                session.activate(&activated);

                if session.config.privilege > PrivilegeLevel::User {
                    session.enter(SessionState::PrivilegeRaise);
                    return Ok(Step::Send(
                        SetSessionPrivilegeLevel {
                            privilege: session.config.privilege,
                        }
                        .request(),
                    ));
                }
                Ok(finish(session))
            }
            SessionState::PrivilegeRaise => {
                let response = response.ok_or(Error::Timeout)?;
                SetSessionPrivilegeLevel {
                    privilege: session.config.privilege,
                }
                .parse_response(response.into_raw())?;
                Ok(finish(session))
            }
            _ => Err(Error::Protocol("handshake response in unexpected state")),
        }
    }
}

fn activate_command(session: &Session) -> ActivateSession {
    ActivateSession {
        auth_type: session.auth_type,
        privilege: session.config.privilege,
        challenge: session.config.oem_challenge.unwrap_or(session.challenge),
        initial_outbound_seq: rand::rng().random(),
    }
}

fn finish(session: &mut Session) -> Step {
    session.bridging = true;
    session.enter(SessionState::Active);
    crate::observe::record_session_opened(
        session.session_id,
        session.auth_type.as_u8(),
        session.config.privilege.as_u8(),
        session.max_privilege,
    );
    Step::Done
}

/// Pick the session authtype from what the channel advertises.
pub(crate) fn select_auth_type(
    requested: Option<AuthType>,
    caps: &ChannelAuthCapabilities,
) -> Result<AuthType> {
    match requested {
        Some(AuthType::Oem) => Err(Error::Unsupported("OEM authentication type")),
        Some(auth_type) if caps.supports(auth_type) => Ok(auth_type),
        Some(_) => Err(Error::Protocol("requested authtype not supported by the BMC")),
        None => AuthType::PREFERENCE
            .into_iter()
            .find(|t| caps.supports(*t))
            .ok_or(Error::Protocol("BMC offers no usable authtype")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::commands::parse_channel_auth_capabilities;

    fn reply(cmd: u8, completion_code: u8, data: Vec<u8>) -> Option<Response> {
        Some(Response {
            netfn: 0x07,
            cmd,
            lun: 0,
            rq_seq: 0,
            completion_code,
            data,
        })
    }

    fn caps_reply(bitmap: u8, status: u8) -> Option<Response> {
        reply(0x38, 0x00, vec![0x01, bitmap, status, 0x01, 0, 0, 0, 0])
    }

    fn challenge_reply() -> Option<Response> {
        let mut data = vec![0x44, 0x33, 0x22, 0x11];
        data.extend([0xC5; 16]);
        reply(0x39, 0x00, data)
    }

    fn activate_reply(auth_type: u8, initial_inbound_seq: u32) -> Option<Response> {
        let mut data = vec![auth_type, 0xEF, 0xBE, 0xAD, 0xDE];
        data.extend(initial_inbound_seq.to_le_bytes());
        data.push(0x04);
        reply(0x3A, 0x00, data)
    }

    fn sent_cmd(step: &Step) -> u8 {
        match step {
            Step::Send(request) => request.cmd,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[test]
    fn handshake_walks_every_state_in_order() {
        let mut session = Session::new(SessionConfig::default());
        let mut handshake = Handshake::default();

        assert_eq!(handshake.start(&mut session), Step::Ping);
        let step = handshake.on_pong(&mut session, None);
        assert_eq!(sent_cmd(&step), 0x38);

        let step = handshake
            .on_response(&mut session, caps_reply(0x17, 0x04))
            .expect("caps");
        assert_eq!(sent_cmd(&step), 0x39);
        assert_eq!(session.auth_type, AuthType::Md5);
        let Step::Send(request) = &step else { unreachable!() };
        assert_eq!(request.data[0], AuthType::Md5.as_u8());

        let step = handshake
            .on_response(&mut session, challenge_reply())
            .expect("challenge");
        assert_eq!(sent_cmd(&step), 0x3A);
        assert_eq!(session.state, SessionState::Activating);
        assert_eq!(session.session_id, 0x1122_3344);
        assert_eq!(session.wire_auth_type(), AuthType::Md5);
        assert_eq!(session.allocate_out_seq(), 0);
        let Step::Send(request) = &step else { unreachable!() };
        assert_eq!(&request.data[2..18], &[0xC5; 16]);

        let step = handshake
            .on_response(&mut session, activate_reply(0x02, 0))
            .expect("activate");
        assert_eq!(sent_cmd(&step), 0x3B);
        assert_eq!(session.session_id, 0xDEAD_BEEF);
        assert!(session.active);
        assert!(!session.bridging);

        let step = handshake
            .on_response(&mut session, reply(0x3B, 0x00, vec![0x04]))
            .expect("privilege");
        assert_eq!(step, Step::Done);
        assert_eq!(session.state, SessionState::Active);
        assert!(session.bridging);
        assert_eq!(session.allocate_out_seq(), 1);
        assert_eq!(session.allocate_out_seq(), 2);
    }

    #[test]
    fn user_privilege_skips_the_privilege_raise() {
        let mut session = Session::new(SessionConfig {
            privilege: PrivilegeLevel::User,
            ping: false,
            ..SessionConfig::default()
        });
        let mut handshake = Handshake::default();

        assert_eq!(sent_cmd(&handshake.start(&mut session)), 0x38);
        handshake
            .on_response(&mut session, caps_reply(0x01, 0x00))
            .expect("caps");
        assert_eq!(session.auth_type, AuthType::None);
        handshake
            .on_response(&mut session, challenge_reply())
            .expect("challenge");
        let step = handshake
            .on_response(&mut session, activate_reply(0x00, 77))
            .expect("activate");
        assert_eq!(step, Step::Done);
        assert_eq!(session.allocate_out_seq(), 77);
    }

    #[test]
    fn auth_caps_timeout_pauses_and_retries_once() {
        let mut session = Session::new(SessionConfig {
            ping: false,
            ..SessionConfig::default()
        });
        let mut handshake = Handshake::default();
        handshake.start(&mut session);

        let step = handshake.on_response(&mut session, None).expect("pause");
        assert_eq!(step, Step::Pause(AUTH_CAPS_RETRY_PAUSE));
        assert_eq!(sent_cmd(&handshake.resume(&mut session)), 0x38);

        let err = handshake.on_response(&mut session, None).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn activate_with_other_authtype_is_a_protocol_error() {
        let mut session = Session::new(SessionConfig::default());
        let mut handshake = Handshake::default();
        handshake.start(&mut session);
        handshake.on_pong(&mut session, None);
        handshake
            .on_response(&mut session, caps_reply(0x04, 0x00))
            .expect("caps");
        handshake
            .on_response(&mut session, challenge_reply())
            .expect("challenge");

        let err = handshake
            .on_response(&mut session, activate_reply(0x01, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn oem_challenge_replaces_the_bmc_challenge() {
        let mut session = Session::new(SessionConfig {
            ping: false,
            oem_challenge: Some([0x11; 16]),
            ..SessionConfig::default()
        });
        let mut handshake = Handshake::default();
        handshake.start(&mut session);
        handshake
            .on_response(&mut session, caps_reply(0x04, 0x00))
            .expect("caps");
        let step = handshake
            .on_response(&mut session, challenge_reply())
            .expect("challenge");
        let Step::Send(request) = step else {
            panic!("expected activate request");
        };
        assert_eq!(&request.data[2..18], &[0x11; 16]);
    }

    #[test]
    fn i82571spt_skips_the_ping() {
        let mut session = Session::new(SessionConfig {
            oem: Some(OemProfile::Intel82571Spt),
            ..SessionConfig::default()
        });
        assert_eq!(sent_cmd(&Handshake::default().start(&mut session)), 0x38);
    }

    #[test]
    fn per_message_auth_disabled_sends_unauthenticated_after_activation() {
        let mut session = Session::new(SessionConfig {
            privilege: PrivilegeLevel::User,
            ping: false,
            ..SessionConfig::default()
        });
        let mut handshake = Handshake::default();
        handshake.start(&mut session);
        handshake
            .on_response(&mut session, caps_reply(0x04, 0x10))
            .expect("caps");
        handshake
            .on_response(&mut session, challenge_reply())
            .expect("challenge");
        assert_eq!(session.wire_auth_type(), AuthType::Md5);
        handshake
            .on_response(&mut session, activate_reply(0x02, 5))
            .expect("activate");
        assert_eq!(session.wire_auth_type(), AuthType::None);
    }

    #[test]
    fn authtype_selection() {
        let caps = parse_channel_auth_capabilities(&[0x01, 0x11, 0, 0, 0, 0, 0, 0]).expect("caps");
        assert_eq!(select_auth_type(None, &caps).expect("auto"), AuthType::Password);
        assert_eq!(
            select_auth_type(Some(AuthType::None), &caps).expect("explicit"),
            AuthType::None
        );
        assert!(matches!(
            select_auth_type(Some(AuthType::Md5), &caps),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            select_auth_type(Some(AuthType::Oem), &caps),
            Err(Error::Unsupported(_))
        ));

        let empty = parse_channel_auth_capabilities(&[0x01, 0x00, 0, 0, 0, 0, 0, 0]).expect("caps");
        assert!(select_auth_type(None, &empty).is_err());
    }
}
