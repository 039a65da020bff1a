//! Host key material: the public/private keypairs used to authenticate the
//! server side of a handshake, their SSH wire encodings, and signing.

pub mod private;
pub mod public;
pub mod signature;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeysError {
    #[error("malformed key blob: {0}")]
    Format(#[from] cluelessh_format::FormatError),
    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("malformed key material: {0}")]
    Malformed(String),
    #[error("failed to read PEM: {0}")]
    Pem(#[from] pem::PemError),
    #[error("failed to decode private key: {0}")]
    Pkcs8(String),
}

pub type Result<T, E = KeysError> = std::result::Result<T, E>;

pub const SSH_RSA: &str = "ssh-rsa";
pub const SSH_DSS: &str = "ssh-dss";
pub const ECDSA_SHA2_NISTP256: &str = "ecdsa-sha2-nistp256";
