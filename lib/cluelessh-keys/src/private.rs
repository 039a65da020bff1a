use pkcs8::DecodePrivateKey;
use rsa::signature::{RandomizedDigestSigner, SignatureEncoding, Signer};
use sha1::Digest as _;

use crate::public::PublicKey;
use crate::signature::Signature;
use crate::{KeysError, Result};

/// The private half of a host keypair.
///
/// Loaded fresh from disk for the duration of a single handshake (or a
/// single keysign request) and never persisted beyond that: callers should
/// let it drop as soon as signing is done rather than caching it across
/// connections. `Clone` is derived so a process that loads a host key once
/// at startup (the proxy, which spawns one transport per session) can hand
/// each session its own owned copy instead of re-reading the file.
#[derive(Clone)]
pub enum PrivateKey {
    Rsa(Box<rsa::RsaPrivateKey>),
    Dsa(Box<dsa::SigningKey>),
    EcdsaSha2NistP256(Box<p256::ecdsa::SigningKey>),
}

/// A private key plus the public key it corresponds to, as handed to the
/// ECDH state machine and the keysign validator by their respective
/// `load_host_private` collaborators.
#[derive(Clone)]
pub struct PlaintextPrivateKey {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl PrivateKey {
    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(key) => {
                let pub_key = key.to_public_key();
                PublicKey::Rsa {
                    e: pub_key.e().to_bytes_be(),
                    n: pub_key.n().to_bytes_be(),
                }
            }
            PrivateKey::Dsa(key) => {
                let components = key.verifying_key().components();
                PublicKey::Dsa {
                    p: components.p().to_bytes_be(),
                    q: components.q().to_bytes_be(),
                    g: components.g().to_bytes_be(),
                    y: key.verifying_key().y().to_bytes_be(),
                }
            }
            PrivateKey::EcdsaSha2NistP256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                PublicKey::EcdsaSha2NistP256 {
                    q: point.as_bytes().to_vec(),
                }
            }
        }
    }

    /// Signs `data` (the exchange hash `H`, or a whole keysign signed-data
    /// blob), returning the SSH wire-form signature.
    pub fn sign(&self, data: &[u8]) -> Signature {
        match self {
            PrivateKey::Rsa(key) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new((**key).clone());
                let sig = signing_key.sign(data);
                Signature::Rsa {
                    sig: sig.to_bytes().to_vec(),
                }
            }
            PrivateKey::Dsa(key) => {
                // ssh-dss (RFC 4253 §6.6) signs SHA-1(H), fixed by the wire
                // algorithm name regardless of key size — not whatever hash
                // `dsa`'s blanket `Signer` impl would pick.
                let digest = sha1::Sha1::new_with_prefix(data);
                let sig: dsa::Signature = key.sign_digest_with_rng(&mut rand::thread_rng(), digest);
                let r = sig.r().to_bytes_be();
                let s = sig.s().to_bytes_be();
                Signature::Dsa {
                    r: left_pad_20(&r),
                    s: left_pad_20(&s),
                }
            }
            PrivateKey::EcdsaSha2NistP256(key) => {
                let sig: p256::ecdsa::Signature = key.sign(data);
                let (r, s) = sig.split_bytes();
                Signature::EcdsaSha2NistP256 {
                    r: r.to_vec(),
                    s: s.to_vec(),
                }
            }
        }
    }
}

fn left_pad_20(bytes: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    let start = 20usize.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(20)..]);
    out
}

impl PlaintextPrivateKey {
    /// Loads a PEM-encoded PKCS#8 (or, for EC keys, SEC1) private key file,
    /// trying RSA, then ECDSA, then DSA in turn.
    pub fn from_pem_pkcs8_or_sec1(pem: &str) -> Result<Self> {
        if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
            let private_key = PrivateKey::Rsa(Box::new(key));
            let public_key = private_key.public_key();
            return Ok(Self {
                public_key,
                private_key,
            });
        }
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
            .or_else(|_| p256::ecdsa::SigningKey::from_sec1_pem(pem))
        {
            let private_key = PrivateKey::EcdsaSha2NistP256(Box::new(key));
            let public_key = private_key.public_key();
            return Ok(Self {
                public_key,
                private_key,
            });
        }
        if let Ok(key) = dsa::SigningKey::from_pkcs8_pem(pem) {
            let private_key = PrivateKey::Dsa(Box::new(key));
            let public_key = private_key.public_key();
            return Ok(Self {
                public_key,
                private_key,
            });
        }
        Err(KeysError::Pkcs8(
            "key is not a recognized RSA, DSA or ECDSA (nistp256) PEM private key".to_owned(),
        ))
    }
}
