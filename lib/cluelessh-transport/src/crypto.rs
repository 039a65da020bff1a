//! ECDH key exchange primitives: curve selection, keypair generation, point
//! validation, shared-secret computation and the RFC 5656 exchange hash.

use cluelessh_format::Writer;
use p256::elliptic_curve::sec1::FromEncodedPoint;
use secrecy::{CloneableSecret, DebugSecret, Secret, Zeroize};
use sha2::Digest;

use crate::{SshRng, SshRngRandAdapter, SshStatus};

/// One of the three RFC 5656 curves this crate supports as KEX groups.
/// `curve25519-sha256` is deliberately absent: host and peer are restricted
/// to `ecdh-sha2-nistp{256,384,521}` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    NistP256,
    NistP384,
    NistP521,
}

impl Curve {
    pub fn kex_algorithm_name(self) -> &'static str {
        match self {
            Curve::NistP256 => "ecdh-sha2-nistp256",
            Curve::NistP384 => "ecdh-sha2-nistp384",
            Curve::NistP521 => "ecdh-sha2-nistp521",
        }
    }

    /// Digest width in bytes of this curve's exchange hash, per RFC 5656 §4.
    pub fn digest_size(self) -> usize {
        match self {
            Curve::NistP256 => 32,
            Curve::NistP384 => 48,
            Curve::NistP521 => 64,
        }
    }
}

/// Looks up a curve by its `ecdh-sha2-nistp*` KEX algorithm name.
pub fn curve_from_name(name: &str) -> crate::Result<Curve> {
    match name {
        "ecdh-sha2-nistp256" => Ok(Curve::NistP256),
        "ecdh-sha2-nistp384" => Ok(Curve::NistP384),
        "ecdh-sha2-nistp521" => Ok(Curve::NistP521),
        other => Err(crate::peer_error!("unsupported KEX algorithm: {other}")),
    }
}

/// The names this crate is willing to negotiate, most preferred first.
pub const SUPPORTED_KEX_ALGORITHMS: &[&str] = &[
    "ecdh-sha2-nistp256",
    "ecdh-sha2-nistp384",
    "ecdh-sha2-nistp521",
];

/// An ephemeral keypair generated for one handshake. The private scalar is
/// held behind a curve-specific secret type and is dropped (zeroizing) at
/// the end of key exchange.
pub enum KeyExchangeSecret {
    NistP256(p256::ecdh::EphemeralSecret),
    NistP384(p384::ecdh::EphemeralSecret),
    NistP521(p521::ecdh::EphemeralSecret),
}

impl KeyExchangeSecret {
    /// The uncompressed SEC1 public point corresponding to this secret,
    /// i.e. `Q_S` (server) or `Q_C` (client).
    pub fn public_point(&self) -> Vec<u8> {
        match self {
            KeyExchangeSecret::NistP256(s) => {
                p256::EncodedPoint::from(s.public_key()).as_bytes().to_vec()
            }
            KeyExchangeSecret::NistP384(s) => {
                p384::EncodedPoint::from(s.public_key()).as_bytes().to_vec()
            }
            KeyExchangeSecret::NistP521(s) => {
                p521::EncodedPoint::from(s.public_key()).as_bytes().to_vec()
            }
        }
    }
}

/// Generates a fresh ephemeral keypair on `curve`, drawing randomness from
/// `rng` (so callers can substitute a deterministic RNG in tests).
pub fn generate_keypair(curve: Curve, rng: &mut dyn SshRng) -> KeyExchangeSecret {
    let mut adapter = SshRngRandAdapter(rng);
    match curve {
        Curve::NistP256 => KeyExchangeSecret::NistP256(p256::ecdh::EphemeralSecret::random(&mut adapter)),
        Curve::NistP384 => KeyExchangeSecret::NistP384(p384::ecdh::EphemeralSecret::random(&mut adapter)),
        Curve::NistP521 => KeyExchangeSecret::NistP521(p521::ecdh::EphemeralSecret::random(&mut adapter)),
    }
}

/// Parses and validates a peer's uncompressed SEC1 public point for `curve`,
/// rejecting the point at infinity and any encoding that doesn't decode to
/// a point on the curve (RFC 5656 §4's "validate the point" requirement).
///
/// Every rejection reason collapses to the single wire message "invalid
/// client public key" with reason code `SSH_DISCONNECT_KEY_EXCHANGE_FAILED`,
/// per spec §4.4 and scenario S2 — the peer doesn't get to distinguish a bad
/// encoding from an off-curve point from the point at infinity.
pub fn validate_public(curve: Curve, point: &[u8]) -> crate::Result<PeerPublic> {
    let invalid = || {
        crate::peer_error_reason!(
            cluelessh_format::numbers::SSH_DISCONNECT_KEY_EXCHANGE_FAILED,
            "invalid client public key"
        )
    };
    match curve {
        Curve::NistP256 => {
            let encoded = p256::EncodedPoint::from_bytes(point).map_err(|_| invalid())?;
            let maybe = p256::PublicKey::from_encoded_point(&encoded);
            if maybe.is_none().into() {
                return Err(invalid());
            }
            Ok(PeerPublic::NistP256(maybe.unwrap()))
        }
        Curve::NistP384 => {
            let encoded = p384::EncodedPoint::from_bytes(point).map_err(|_| invalid())?;
            let maybe = p384::PublicKey::from_encoded_point(&encoded);
            if maybe.is_none().into() {
                return Err(invalid());
            }
            Ok(PeerPublic::NistP384(maybe.unwrap()))
        }
        Curve::NistP521 => {
            let encoded = p521::EncodedPoint::from_bytes(point).map_err(|_| invalid())?;
            let maybe = p521::PublicKey::from_encoded_point(&encoded);
            if maybe.is_none().into() {
                return Err(invalid());
            }
            Ok(PeerPublic::NistP521(maybe.unwrap()))
        }
    }
}

pub enum PeerPublic {
    NistP256(p256::PublicKey),
    NistP384(p384::PublicKey),
    NistP521(p521::PublicKey),
}

/// The ECDH shared secret `K`, held as an arbitrary-precision big-endian
/// integer (the mpint form RFC 4253 §8 wants it hashed and transmitted as).
#[derive(Clone)]
pub struct SharedSecretInner(pub Vec<u8>);

impl Zeroize for SharedSecretInner {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}
impl CloneableSecret for SharedSecretInner {}
impl DebugSecret for SharedSecretInner {}

pub type SharedSecret = Secret<SharedSecretInner>;

/// Computes the ECDH shared point and returns its x-coordinate as `K`,
/// consuming the ephemeral secret (it must not survive past this call).
pub fn ecdh_compute(secret: KeyExchangeSecret, peer: &PeerPublic) -> crate::Result<SharedSecret> {
    let x = match (secret, peer) {
        (KeyExchangeSecret::NistP256(s), PeerPublic::NistP256(p)) => {
            s.diffie_hellman(p).raw_secret_bytes().to_vec()
        }
        (KeyExchangeSecret::NistP384(s), PeerPublic::NistP384(p)) => {
            s.diffie_hellman(p).raw_secret_bytes().to_vec()
        }
        (KeyExchangeSecret::NistP521(s), PeerPublic::NistP521(p)) => {
            s.diffie_hellman(p).raw_secret_bytes().to_vec()
        }
        _ => return Err(crate::peer_error!("curve mismatch between ephemeral secret and peer point")),
    };
    Ok(Secret::new(SharedSecretInner(x)))
}

/// Writes an mpint the way RFC 4253 §8's exchange-hash inputs require: a
/// leading zero byte is added when the high bit of the first content byte
/// is set, and leading zero bytes are stripped otherwise. Delegates to
/// `cluelessh_format::fixup_mpint`.
fn encode_mpint_for_hash(w: &mut Writer, bytes: &[u8]) {
    w.mpint(bytes);
}

/// Computes the RFC 4253 §8 / RFC 5656 §4 exchange hash `H`:
///
/// ```text
/// H = hash(V_C || V_S || I_C || I_S || K_S || Q_C || Q_S || K)
/// ```
///
/// `curve` selects the digest (SHA-256/384/512 for nistp256/384/521
/// respectively, per RFC 5656 §4).
pub fn key_exchange_hash(
    curve: Curve,
    v_c: &[u8],
    v_s: &[u8],
    i_c: &[u8],
    i_s: &[u8],
    k_s: &[u8],
    q_c: &[u8],
    q_s: &[u8],
    k: &SharedSecret,
) -> Vec<u8> {
    use secrecy::ExposeSecret;

    let mut w = Writer::new();
    w.string(v_c);
    w.string(v_s);
    w.string(i_c);
    w.string(i_s);
    w.string(k_s);
    w.string(q_c);
    w.string(q_s);
    encode_mpint_for_hash(&mut w, &k.expose_secret().0);
    let preimage = w.finish();

    match curve {
        Curve::NistP256 => sha2::Sha256::digest(&preimage).to_vec(),
        Curve::NistP384 => sha2::Sha384::digest(&preimage).to_vec(),
        Curve::NistP521 => sha2::Sha512::digest(&preimage).to_vec(),
    }
}

/// Derives a single key material output per RFC 4253 §7.2:
/// `hash(K || H || letter || session_id)`, repeated with `hash(K || H ||
/// derived)` appended until `len` bytes are available.
pub fn derive_key(curve: Curve, k: &SharedSecret, h: &[u8], letter: u8, session_id: &[u8], len: usize) -> Vec<u8> {
    use secrecy::ExposeSecret;

    let mut w = Writer::new();
    encode_mpint_for_hash(&mut w, &k.expose_secret().0);
    w.write(h);
    w.u8(letter);
    w.write(session_id);
    let preimage = w.finish();

    let mut out = digest_for(curve, &preimage);
    while out.len() < len {
        let mut w = Writer::new();
        encode_mpint_for_hash(&mut w, &k.expose_secret().0);
        w.write(h);
        w.write(&out);
        out.extend(digest_for(curve, &w.finish()));
    }
    out.truncate(len);
    out
}

fn digest_for(curve: Curve, data: &[u8]) -> Vec<u8> {
    match curve {
        Curve::NistP256 => sha2::Sha256::digest(data).to_vec(),
        Curve::NistP384 => sha2::Sha384::digest(data).to_vec(),
        Curve::NistP521 => sha2::Sha512::digest(data).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OsRng;

    #[test]
    fn ecdh_round_trip_nistp256() {
        let mut rng = OsRng;
        let server_secret = generate_keypair(Curve::NistP256, &mut rng);
        let client_secret = generate_keypair(Curve::NistP256, &mut rng);

        let server_point = server_secret.public_point();
        let client_point = client_secret.public_point();

        let server_peer = validate_public(Curve::NistP256, &client_point).unwrap();
        let client_peer = validate_public(Curve::NistP256, &server_point).unwrap();

        use secrecy::ExposeSecret;
        let k_server = ecdh_compute(server_secret, &server_peer).unwrap();
        let k_client = ecdh_compute(client_secret, &client_peer).unwrap();
        assert_eq!(k_server.expose_secret().0, k_client.expose_secret().0);
    }

    #[test]
    fn validate_public_rejects_garbage() {
        let err = validate_public(Curve::NistP256, &[0u8; 3]);
        assert!(err.is_err());
    }

    #[test]
    fn curve_from_name_rejects_curve25519() {
        assert!(curve_from_name("curve25519-sha256").is_err());
    }

    #[test]
    fn digest_sizes_match_curve() {
        assert_eq!(Curve::NistP256.digest_size(), 32);
        assert_eq!(Curve::NistP384.digest_size(), 48);
        assert_eq!(Curve::NistP521.digest_size(), 64);
    }

    #[test]
    fn exchange_hash_is_stable_for_same_inputs() {
        let mut rng = OsRng;
        let secret = generate_keypair(Curve::NistP256, &mut rng);
        let point = secret.public_point();
        let peer = validate_public(Curve::NistP256, &point).unwrap();
        let k = ecdh_compute(generate_keypair(Curve::NistP256, &mut rng), &peer).unwrap();

        let h1 = key_exchange_hash(Curve::NistP256, b"vc", b"vs", b"ic", b"is", b"ks", b"qc", b"qs", &k);
        let h2 = key_exchange_hash(Curve::NistP256, b"vc", b"vs", b"ic", b"is", b"ks", b"qc", b"qs", &k);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
    }
}
