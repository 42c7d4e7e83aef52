use core::fmt;

use md2::Md2;
use md5::{Digest, Md5};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};
use crate::types::AuthType;

/// Size of IPMI v1.5 user names, passwords and authcodes.
pub(crate) const AUTH_CODE_LEN: usize = 16;

/// A minimal secret container that zeroizes its contents on drop.
///
/// This is intentionally small and avoids exposing secrets via `Debug`.
#[derive(Clone)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// The secret as the 16-byte, zero-padded key used by v1.5 authcodes.
    pub(crate) fn to_key16(&self) -> Zeroizing<[u8; AUTH_CODE_LEN]> {
        Zeroizing::new(pad16(&self.0))
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Truncate or zero-pad to the fixed 16-byte field width.
pub(crate) fn pad16(bytes: &[u8]) -> [u8; AUTH_CODE_LEN] {
    let mut out = [0u8; AUTH_CODE_LEN];
    let n = bytes.len().min(out.len());
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Compute the session header authcode for one outbound packet.
///
/// `message` is the complete IPMI message segment (rsAddr through the last
/// checksum). Returns `None` for authtype NONE, which carries no authcode field.
pub(crate) fn auth_code(
    auth_type: AuthType,
    password: &SecretBytes,
    session_id: u32,
    session_seq: u32,
    message: &[u8],
) -> Result<Option<[u8; AUTH_CODE_LEN]>> {
    let key = password.to_key16();
    let code = match auth_type {
        AuthType::None => return Ok(None),
        AuthType::Password => *key,
        AuthType::Md2 => keyed_digest::<Md2>(&key, session_id, session_seq, message),
        AuthType::Md5 => keyed_digest::<Md5>(&key, session_id, session_seq, message),
        AuthType::Oem => return Err(Error::Unsupported("OEM authentication type")),
    };
    Ok(Some(code))
}

/// `H(key ‖ session id ‖ message ‖ session seq ‖ key)` with little-endian integers.
fn keyed_digest<D: Digest>(
    key: &[u8; AUTH_CODE_LEN],
    session_id: u32,
    session_seq: u32,
    message: &[u8],
) -> [u8; AUTH_CODE_LEN] {
    let mut hasher = D::new();
    hasher.update(key);
    hasher.update(session_id.to_le_bytes());
    hasher.update(message);
    hasher.update(session_seq.to_le_bytes());
    hasher.update(key);
    let digest = hasher.finalize();

    let mut out = [0u8; AUTH_CODE_LEN];
    out.copy_from_slice(&digest[..AUTH_CODE_LEN]);
    out
}
