use cluelessh_format::{Reader, Writer};

use crate::{KeysError, Result, ECDSA_SHA2_NISTP256, SSH_DSS, SSH_RSA};

/// A signature over an exchange hash (or, for the keysign helper, over an
/// entire signed-data blob), in the `string alg || string blob` wire form
/// used throughout the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Rsa { sig: Vec<u8> },
    Dsa { r: [u8; 20], s: [u8; 20] },
    EcdsaSha2NistP256 { r: Vec<u8>, s: Vec<u8> },
}

impl Signature {
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Signature::Rsa { .. } => SSH_RSA,
            Signature::Dsa { .. } => SSH_DSS,
            Signature::EcdsaSha2NistP256 { .. } => ECDSA_SHA2_NISTP256,
        }
    }

    pub fn to_wire_encoding(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.string(self.algorithm_name().as_bytes());
        match self {
            Signature::Rsa { sig } => {
                w.string(sig);
            }
            Signature::Dsa { r, s } => {
                let mut blob = Vec::with_capacity(40);
                blob.extend_from_slice(r);
                blob.extend_from_slice(s);
                w.string(&blob);
            }
            Signature::EcdsaSha2NistP256 { r, s } => {
                let mut inner = Writer::new();
                inner.mpint(r);
                inner.mpint(s);
                w.string(&inner.finish());
            }
        }
        w.finish()
    }

    pub fn from_wire_encoding(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let alg = r.utf8_string()?;
        let sig = match alg {
            SSH_RSA => {
                let sig = r.string()?.to_vec();
                Signature::Rsa { sig }
            }
            SSH_DSS => {
                let blob = r.string()?;
                if blob.len() != 40 {
                    return Err(KeysError::Malformed(format!(
                        "ssh-dss signature blob must be 40 bytes, was {}",
                        blob.len()
                    )));
                }
                let mut rr = [0; 20];
                let mut ss = [0; 20];
                rr.copy_from_slice(&blob[..20]);
                ss.copy_from_slice(&blob[20..]);
                Signature::Dsa { r: rr, s: ss }
            }
            ECDSA_SHA2_NISTP256 => {
                let blob = r.string()?;
                let mut inner = Reader::new(blob);
                let rr = inner.mpint()?.to_vec();
                let ss = inner.mpint()?.to_vec();
                inner.finish()?;
                Signature::EcdsaSha2NistP256 { r: rr, s: ss }
            }
            other => return Err(KeysError::UnsupportedAlgorithm(other.to_owned())),
        };
        r.finish()?;
        Ok(sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdsa_signature_round_trips() {
        let sig = Signature::EcdsaSha2NistP256 {
            r: vec![0x7f, 1, 2],
            s: vec![0x01, 0x02],
        };
        let encoded = sig.to_wire_encoding();
        let decoded = Signature::from_wire_encoding(&encoded).unwrap();
        assert_eq!(sig, decoded);
    }

    #[test]
    fn dsa_signature_requires_40_byte_blob() {
        let mut w = Writer::new();
        w.string(SSH_DSS.as_bytes());
        w.string(&[0; 10]);
        assert!(matches!(
            Signature::from_wire_encoding(&w.finish()),
            Err(KeysError::Malformed(_))
        ));
    }
}
