use std::net::SocketAddr;
use std::time::Duration;

use crate::bridge::BridgePath;
use crate::crypto::{AUTH_CODE_LEN, SecretBytes, pad16};
use crate::error::{Error, Result};
use crate::session::SessionConfig;
use crate::types::{AuthType, OemProfile, PrivilegeLevel, RetryPolicy};

#[cfg(feature = "blocking")]
pub(crate) mod blocking;

pub(crate) mod core;

#[cfg(feature = "async")]
pub(crate) mod tokio;

/// Builder for [`Client`](crate::Client) and `AsyncClient`.
///
/// Building opens the session: the returned client is already `Active`.
#[derive(Debug)]
pub struct ClientBuilder {
    target: SocketAddr,
    username: Vec<u8>,
    config: SessionConfig,
}

impl ClientBuilder {
    /// Create a new builder. Without credentials the session logs in as the
    /// null user.
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            username: Vec::new(),
            config: SessionConfig::default(),
        }
    }

    /// Set the username (bytes).
    ///
    /// IPMI usernames are ASCII in most deployments, but the protocol treats them as raw bytes.
    pub fn username_bytes(mut self, username: impl Into<Vec<u8>>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the username (UTF-8 string). This is a convenience wrapper around [`Self::username_bytes`].
    pub fn username(mut self, username: impl AsRef<str>) -> Self {
        self.username = username.as_ref().as_bytes().to_vec();
        self
    }

    /// Set the password (bytes).
    pub fn password_bytes(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.config.password = SecretBytes::new(password.into());
        self
    }

    /// Set the password (UTF-8 string). This is a convenience wrapper around [`Self::password_bytes`].
    pub fn password(mut self, password: impl AsRef<str>) -> Self {
        self.config.password = SecretBytes::new(password.as_ref().as_bytes().to_vec());
        self
    }

    /// Set requested session privilege level.
    pub fn privilege_level(mut self, level: PrivilegeLevel) -> Self {
        self.config.privilege = level;
        self
    }

    /// Pin the authtype instead of picking the strongest one the BMC offers.
    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.config.auth_type = Some(auth_type);
        self
    }

    /// Set how long each attempt waits for an answer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.retry.timeout = timeout;
        self
    }

    /// Set number of send attempts per request (including the first attempt).
    pub fn retries(mut self, attempts: u32) -> Self {
        self.config.retry.attempts = attempts;
        self
    }

    /// Set the pause between a timed-out attempt and the next one.
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    /// Replace the whole retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Enable or disable the ASF presence ping before session setup.
    pub fn ping(mut self, enabled: bool) -> Self {
        self.config.ping = enabled;
        self
    }

    /// Route application requests through IPMB bridges once the session is active.
    pub fn bridge(mut self, path: BridgePath) -> Self {
        self.config.bridge = path;
        self
    }

    /// IPMB address the BMC uses as requester on bridged buses (default 0x20).
    pub fn local_address(mut self, addr: u8) -> Self {
        self.config.local_addr = addr;
        self
    }

    /// Enable a firmware quirk profile.
    pub fn oem(mut self, profile: OemProfile) -> Self {
        self.config.oem = Some(profile);
        self
    }

    /// Send this string in Activate Session instead of the BMC's challenge.
    pub fn oem_challenge(mut self, challenge: impl AsRef<[u8]>) -> Self {
        self.config.oem_challenge = Some(pad16(challenge.as_ref()));
        self
    }

    /// Interval after which [`Client::keepalive`](crate::Client::keepalive)
    /// sends a Get Device ID.
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.config.keepalive = Some(interval);
        self
    }

    pub(crate) fn into_parts(self) -> Result<(SocketAddr, SessionConfig)> {
        let Self {
            target,
            username,
            mut config,
        } = self;

        if username.len() > AUTH_CODE_LEN {
            return Err(Error::InvalidArgument("username longer than 16 bytes"));
        }
        if config.password.len() > AUTH_CODE_LEN {
            return Err(Error::InvalidArgument("password longer than 16 bytes"));
        }
        if config.retry.attempts == 0 {
            return Err(Error::InvalidArgument("at least one attempt is required"));
        }
        if config.local_addr & 0x01 != 0 {
            return Err(Error::InvalidArgument("IPMB addresses are even"));
        }

        config.username = pad16(&username);
        Ok((target, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SocketAddr {
        "127.0.0.1:623".parse().expect("addr")
    }

    #[test]
    fn builder_collects_configuration() {
        let (addr, config) = ClientBuilder::new(target())
            .username("admin")
            .password("secret")
            .privilege_level(PrivilegeLevel::Operator)
            .auth_type(AuthType::Md2)
            .timeout(Duration::from_millis(250))
            .retries(2)
            .ping(false)
            .local_address(0x40)
            .oem(OemProfile::IntelWv2)
            .into_parts()
            .expect("config");

        assert_eq!(addr, target());
        assert_eq!(&config.username[..6], b"admin\0");
        assert_eq!(config.privilege, PrivilegeLevel::Operator);
        assert_eq!(config.auth_type, Some(AuthType::Md2));
        assert_eq!(config.retry.attempts, 2);
        assert_eq!(config.retry.timeout, Duration::from_millis(250));
        assert!(!config.ping);
        assert_eq!(config.local_addr, 0x40);
        assert_eq!(config.oem, Some(OemProfile::IntelWv2));
    }

    #[test]
    fn builder_rejects_oversized_credentials() {
        let err = ClientBuilder::new(target())
            .username("a-very-long-user-name")
            .into_parts()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = ClientBuilder::new(target())
            .password_bytes(vec![b'x'; 17])
            .into_parts()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let err = ClientBuilder::new(target())
            .retries(0)
            .into_parts()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
