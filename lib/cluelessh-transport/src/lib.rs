//! The SSH v2 binary packet protocol and the server-side ECDH key exchange
//! state machine built on top of it.

pub mod crypto;
pub mod kex;
pub mod packet;
pub mod server;

use rand_core::{CryptoRng, RngCore};
use thiserror::Error;

/// A status produced by anything that can end a connection.
///
/// `PeerError` carries an RFC 4253 §11.1 disconnect reason code plus a
/// human-readable description; [`ServerConnection::recv_bytes`] turns it
/// into an outgoing `SSH_MSG_DISCONNECT` queued ahead of teardown, per spec
/// §7's "policy/validation failures emit an SSH DISCONNECT" rule.
/// `Disconnect` means the peer already said goodbye (or an unrecoverable
/// local condition was hit) and no further protocol traffic should be sent.
#[derive(Debug, Error)]
pub enum SshStatus {
    #[error("protocol error ({0}): {1}")]
    PeerError(u32, String),
    #[error("connection closed")]
    Disconnect,
}

impl SshStatus {
    pub fn reason(&self) -> Option<u32> {
        match self {
            SshStatus::PeerError(reason, _) => Some(*reason),
            SshStatus::Disconnect => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            SshStatus::PeerError(_, message) => Some(message),
            SshStatus::Disconnect => None,
        }
    }
}

pub type Result<T, E = SshStatus> = std::result::Result<T, E>;

impl From<cluelessh_format::FormatError> for SshStatus {
    fn from(err: cluelessh_format::FormatError) -> Self {
        SshStatus::PeerError(cluelessh_format::numbers::SSH_DISCONNECT_PROTOCOL_ERROR, err.to_string())
    }
}

/// Constructs a [`SshStatus::PeerError`] with `SSH_DISCONNECT_PROTOCOL_ERROR`
/// and a formatted message. Use [`peer_error_reason`] when a more specific
/// RFC 4253 §11.1 reason code applies (key exchange failure, MAC failure,
/// unsupported protocol version, ...).
#[macro_export]
macro_rules! peer_error {
    ($($tt:tt)*) => {
        $crate::SshStatus::PeerError(
            $crate::cluelessh_format::numbers::SSH_DISCONNECT_PROTOCOL_ERROR,
            format!($($tt)*),
        )
    };
}

/// Constructs a [`SshStatus::PeerError`] with an explicit disconnect reason
/// code, e.g. `peer_error_reason!(numbers::SSH_DISCONNECT_KEY_EXCHANGE_FAILED, "...")`.
#[macro_export]
macro_rules! peer_error_reason {
    ($reason:expr, $($tt:tt)*) => {
        $crate::SshStatus::PeerError($reason, format!($($tt)*))
    };
}

pub use cluelessh_format;

/// The session identifier: the first exchange hash `H` computed on a
/// connection. Its length depends on the KEX algorithm's digest (32, 48 or
/// 64 bytes for SHA-256/384/512), so unlike the upstream `cluelessh`
/// prototype (which hardcoded a `[u8; 32]` because it only ever used
/// SHA-256-based algorithms) this holds an owned, variable-length digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub Vec<u8>);

/// A source of cryptographically secure random bytes, injected so that
/// tests can supply deterministic output (see
/// `server::tests::handshake_nistp256`).
pub trait SshRng {
    fn fill_bytes(&mut self, dest: &mut [u8]);
}

pub struct OsRng;
impl SshRng for OsRng {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(dest);
    }
}

/// Adapts an [`SshRng`] to the `rand_core` traits the elliptic-curve crates
/// expect.
pub(crate) struct SshRngRandAdapter<'a>(pub &'a mut dyn SshRng);

impl RngCore for SshRngRandAdapter<'_> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0; 4];
        self.0.fill_bytes(&mut buf);
        u32::from_ne_bytes(buf)
    }
    fn next_u64(&mut self) -> u64 {
        let mut buf = [0; 8];
        self.0.fill_bytes(&mut buf);
        u64::from_ne_bytes(buf)
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.0.fill_bytes(dest);
        Ok(())
    }
}
impl CryptoRng for SshRngRandAdapter<'_> {}
