//! The server-side ECDH key exchange state machine: `KEX_ECDH_INIT` in,
//! `KEX_ECDH_REPLY` out, exchange hash computed and signed, key material
//! derived.
//!
//! Modeled as an explicit enum rather than a callback table (see
//! `server::ServerState`, which embeds the expected next message in the
//! variant itself): an out-of-phase message is simply a non-matching match
//! arm, never a missed registration.

use cluelessh_format::{numbers, Reader, Writer};
use cluelessh_keys::private::PlaintextPrivateKey;
use tracing::debug;

use crate::crypto::{self, Curve, KeyExchangeSecret, SharedSecret};
use crate::{peer_error, Result, SessionId, SshRng};

/// Where a single key exchange currently stands. `Aborted` is terminal: once
/// entered, the connection must be torn down and no further transitions are
/// attempted.
#[derive(Debug)]
pub enum KexState {
    AwaitInit { curve: Curve },
    Computing,
    Replying,
    Derived,
    Done,
    Aborted,
}

/// The client's `KEX_ECDH_INIT` payload: just the client's ephemeral public
/// point `Q_C`.
pub struct KexEcdhInit {
    pub q_c: Vec<u8>,
}

impl KexEcdhInit {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let msg_type = r.u8()?;
        if msg_type != numbers::SSH_MSG_KEX_ECDH_INIT {
            return Err(peer_error!(
                "expected SSH_MSG_KEX_ECDH_INIT ({}), got {msg_type}",
                numbers::SSH_MSG_KEX_ECDH_INIT
            ));
        }
        let q_c = r.ec_point()?.to_vec();
        r.finish()?;
        Ok(Self { q_c })
    }
}

/// The server's `KEX_ECDH_REPLY` payload, plus the locally-derived state a
/// caller needs to install the new keys.
pub struct KexEcdhReply {
    pub payload: Vec<u8>,
    pub exchange_hash: Vec<u8>,
    pub shared_secret: SharedSecret,
}

/// Parameters identified during algorithm negotiation (`KEXINIT`), handed in
/// once per handshake.
pub struct KexEcdhParameters<'a> {
    pub curve: Curve,
    pub v_c: &'a [u8],
    pub v_s: &'a [u8],
    pub i_c: &'a [u8],
    pub i_s: &'a [u8],
    pub host_key: &'a PlaintextPrivateKey,
}

/// Runs the server side of one ECDH exchange to completion: parses the
/// client's init message, generates the server's ephemeral keypair,
/// validates the client's point, computes `K`, the exchange hash `H`, signs
/// `H` with the host key, and returns the reply to send plus `H`/`K` for key
/// derivation.
///
/// The ephemeral [`KeyExchangeSecret`] only lives inside this function: it
/// is consumed by `crypto::ecdh_compute` and never returned, so it zeroizes
/// on drop at every exit path (including the `?` early returns), without a
/// `goto out`-style epilogue.
pub fn do_key_exchange(
    params: KexEcdhParameters<'_>,
    client_init: &[u8],
    rng: &mut dyn SshRng,
) -> Result<KexEcdhReply> {
    let init = KexEcdhInit::parse(client_init)?;
    let peer = crypto::validate_public(params.curve, &init.q_c)?;

    let server_secret: KeyExchangeSecret = crypto::generate_keypair(params.curve, rng);
    let q_s = server_secret.public_point();

    let shared_secret = crypto::ecdh_compute(server_secret, &peer)?;

    let k_s = params.host_key.public_key.to_wire_encoding();
    let exchange_hash = crypto::key_exchange_hash(
        params.curve,
        params.v_c,
        params.v_s,
        params.i_c,
        params.i_s,
        &k_s,
        &init.q_c,
        &q_s,
        &shared_secret,
    );

    let signature = params.host_key.private_key.sign(&exchange_hash);

    let mut w = Writer::new();
    w.u8(numbers::SSH_MSG_KEX_ECDH_REPLY);
    w.string(&k_s);
    w.string(&q_s);
    w.string(&signature.to_wire_encoding());

    debug!(curve = params.curve.kex_algorithm_name(), "completed ECDH key exchange");

    Ok(KexEcdhReply {
        payload: w.finish(),
        exchange_hash,
        shared_secret,
    })
}

/// The first exchange hash `H` on a connection becomes its [`SessionId`] and
/// never changes thereafter, even across a hypothetical future rekey.
pub fn session_id_from_first_hash(h: &[u8]) -> SessionId {
    SessionId(h.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluelessh_keys::private::PrivateKey;
    use cluelessh_keys::public::PublicKey;

    fn test_host_key() -> PlaintextPrivateKey {
        use p256::ecdsa::SigningKey;
        let signing_key = SigningKey::from_bytes(&[0x11; 32].into()).unwrap();
        let private_key = PrivateKey::EcdsaSha2NistP256(Box::new(signing_key));
        let public_key = private_key.public_key();
        PlaintextPrivateKey { public_key, private_key }
    }

    #[test]
    fn full_exchange_produces_matching_hash_on_both_sides() {
        let mut rng = crate::OsRng;
        let host_key = test_host_key();

        let client_secret = crypto::generate_keypair(Curve::NistP256, &mut rng);
        let q_c = client_secret.public_point();

        let mut init_writer = Writer::new();
        init_writer.u8(numbers::SSH_MSG_KEX_ECDH_INIT);
        init_writer.string(&q_c);

        let params = KexEcdhParameters {
            curve: Curve::NistP256,
            v_c: b"SSH-2.0-client",
            v_s: b"SSH-2.0-server",
            i_c: b"i_c",
            i_s: b"i_s",
            host_key: &host_key,
        };
        let reply = do_key_exchange(params, &init_writer.finish(), &mut rng).unwrap();

        let mut r = Reader::new(&reply.payload);
        assert_eq!(r.u8().unwrap(), numbers::SSH_MSG_KEX_ECDH_REPLY);
        let k_s = r.string().unwrap().to_vec();
        let q_s = r.string().unwrap().to_vec();
        let _sig = r.string().unwrap();
        r.finish().unwrap();

        assert_eq!(k_s, host_key.public_key.to_wire_encoding());

        let server_peer = crypto::validate_public(Curve::NistP256, &q_s).unwrap();
        use secrecy::ExposeSecret;
        let client_k = crypto::ecdh_compute(client_secret, &server_peer).unwrap();
        let client_hash = crypto::key_exchange_hash(
            Curve::NistP256,
            b"SSH-2.0-client",
            b"SSH-2.0-server",
            b"i_c",
            b"i_s",
            &k_s,
            &q_c,
            &q_s,
            &client_k,
        );
        assert_eq!(client_hash, reply.exchange_hash);
        assert_eq!(client_k.expose_secret().0, reply.shared_secret.expose_secret().0);
    }

    #[test]
    fn malformed_init_message_type_is_rejected() {
        let mut w = Writer::new();
        w.u8(numbers::SSH_MSG_KEX_ECDH_REPLY);
        w.string(b"not a point");
        assert!(KexEcdhInit::parse(&w.finish()).is_err());
    }

    #[test]
    fn session_id_is_the_raw_first_hash() {
        let id = session_id_from_first_hash(&[1, 2, 3]);
        assert_eq!(id.0, vec![1, 2, 3]);
    }
}
