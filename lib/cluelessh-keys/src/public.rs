use cluelessh_format::{Reader, Writer};

use crate::{KeysError, Result, ECDSA_SHA2_NISTP256, SSH_DSS, SSH_RSA};

/// A host public key, in one of the three families named by the data model:
/// RSA, DSA, or ECDSA (nistp256).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa {
        e: Vec<u8>,
        n: Vec<u8>,
    },
    Dsa {
        p: Vec<u8>,
        q: Vec<u8>,
        g: Vec<u8>,
        y: Vec<u8>,
    },
    EcdsaSha2NistP256 {
        /// Uncompressed SEC1 point.
        q: Vec<u8>,
    },
}

impl PublicKey {
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            PublicKey::Rsa { .. } => SSH_RSA,
            PublicKey::Dsa { .. } => SSH_DSS,
            PublicKey::EcdsaSha2NistP256 { .. } => ECDSA_SHA2_NISTP256,
        }
    }

    /// The `string alg || ...` key blob as it appears on the wire (as
    /// `K_S` in a `KEX_ECDH_REPLY`, or as the `pubkey_blob` of a keysign
    /// request).
    pub fn to_wire_encoding(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.string(self.algorithm_name().as_bytes());
        match self {
            PublicKey::Rsa { e, n } => {
                w.mpint(e);
                w.mpint(n);
            }
            PublicKey::Dsa { p, q, g, y } => {
                w.mpint(p);
                w.mpint(q);
                w.mpint(g);
                w.mpint(y);
            }
            PublicKey::EcdsaSha2NistP256 { q } => {
                w.string(b"nistp256");
                w.string(q);
            }
        }
        w.finish()
    }

    pub fn from_wire_encoding(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let alg = r.utf8_string()?;
        let key = match alg {
            SSH_RSA => {
                let e = r.mpint()?.to_vec();
                let n = r.mpint()?.to_vec();
                PublicKey::Rsa { e, n }
            }
            SSH_DSS => {
                let p = r.mpint()?.to_vec();
                let q = r.mpint()?.to_vec();
                let g = r.mpint()?.to_vec();
                let y = r.mpint()?.to_vec();
                PublicKey::Dsa { p, q, g, y }
            }
            ECDSA_SHA2_NISTP256 => {
                let curve = r.utf8_string()?;
                if curve != "nistp256" {
                    return Err(KeysError::Malformed(format!(
                        "unexpected curve for ecdsa-sha2-nistp256: {curve}"
                    )));
                }
                let q = r.ec_point()?.to_vec();
                PublicKey::EcdsaSha2NistP256 { q }
            }
            other => return Err(KeysError::UnsupportedAlgorithm(other.to_owned())),
        };
        r.finish()?;
        Ok(key)
    }

    /// The verifying key for ECDSA signature checking (used by a client
    /// role or a pinned-known-key check; not exercised by the server-only
    /// ECDH state machine itself).
    pub fn as_p256_verifying_key(&self) -> Result<p256::ecdsa::VerifyingKey> {
        let PublicKey::EcdsaSha2NistP256 { q } = self else {
            return Err(KeysError::Malformed("not an ecdsa-sha2-nistp256 key".into()));
        };
        p256::ecdsa::VerifyingKey::from_sec1_bytes(q)
            .map_err(|e| KeysError::Malformed(format!("invalid p256 point: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_round_trips_through_wire_encoding() {
        let key = PublicKey::Rsa {
            e: vec![1, 0, 1],
            n: vec![0x80, 1, 2, 3],
        };
        let encoded = key.to_wire_encoding();
        let decoded = PublicKey::from_wire_encoding(&encoded).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let mut w = Writer::new();
        w.string(b"ssh-made-up");
        assert!(matches!(
            PublicKey::from_wire_encoding(&w.finish()),
            Err(KeysError::UnsupportedAlgorithm(_))
        ));
    }
}
