//! Validates the `signed_data` payload of a keysign request against spec
//! §4.7 / `ssh-keysign.c`'s `valid_request`: every check runs and every
//! failure is collected, rather than bailing out on the first mismatch, so
//! the single rejection a caller sees explains everything that was wrong.

use cluelessh_format::{numbers, Reader};
use cluelessh_keys::public::PublicKey;
use eyre::{bail, Result};

/// Runs every check in spec §4.7 against `signed_data` and returns the
/// embedded public-key blob on success. Malformed wire encoding (truncated
/// fields, non-UTF-8 strings) is a hard parse error; everything else is
/// accumulated and reported together.
pub fn validate_request(local_host: &str, signed_data: &[u8]) -> Result<Vec<u8>> {
    let mut r = Reader::new(signed_data);
    let session_id = r.string()?;
    let msg_type = r.u8()?;
    let _server_user = r.string()?;
    let service = r.utf8_string()?;
    let method = r.utf8_string()?;
    let pubkey_alg = r.utf8_string()?;
    let pubkey_blob = r.string()?.to_vec();
    let client_host = r.utf8_string()?;
    let local_user = r.utf8_string()?;
    let no_trailing_bytes = r.finish();

    let mut fails = Vec::new();

    if session_id.len() != 20 && session_id.len() != 32 {
        fails.push(format!("session id length {} not in {{20, 32}}", session_id.len()));
    }
    if msg_type != numbers::SSH_MSG_USERAUTH_REQUEST {
        fails.push(format!(
            "message type {msg_type} is not SSH_MSG_USERAUTH_REQUEST ({})",
            numbers::SSH_MSG_USERAUTH_REQUEST
        ));
    }
    if service != "ssh-connection" {
        fails.push(format!("service {service:?} is not \"ssh-connection\""));
    }
    if method != "hostbased" {
        fails.push(format!("method {method:?} is not \"hostbased\""));
    }
    match PublicKey::from_wire_encoding(&pubkey_blob) {
        Ok(key) if key.algorithm_name() == pubkey_alg => {}
        Ok(key) => fails.push(format!(
            "pubkey alg {pubkey_alg:?} does not match blob's actual type {:?}",
            key.algorithm_name()
        )),
        Err(err) => fails.push(format!("pubkey blob does not parse: {err}")),
    }

    let expected_client_host = format!("{local_host}.");
    if !client_host.eq_ignore_ascii_case(&expected_client_host) {
        fails.push(format!(
            "client host {client_host:?} does not match expected {expected_client_host:?}"
        ));
    }

    let process_user = current_user_name();
    if local_user != process_user {
        fails.push(format!(
            "local user {local_user:?} does not match process user {process_user:?}"
        ));
    }

    if no_trailing_bytes.is_err() {
        fails.push("trailing bytes after signed-data fields".to_owned());
    }

    if !fails.is_empty() {
        bail!("keysign request rejected: {}", fails.join("; "));
    }

    Ok(pubkey_blob)
}

/// The "current process's password-file user name" spec §4.7 wants.
///
/// A full implementation resolves this via `getpwuid(getuid())`, which
/// needs either `libc` or a passwd-parsing crate outside this workspace's
/// stack; `$USER`/`$LOGNAME` (as set by the login shell or `sshd` itself for
/// the privilege-separated child) is used instead.
fn current_user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default()
}
