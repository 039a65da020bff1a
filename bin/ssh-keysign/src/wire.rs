//! `uint32 length || bytes` framing for the duplex keysign pipe (spec §6.4).
//! Distinct from the SSH binary packet protocol: no padding, no MAC, just a
//! length-prefixed blob in each direction.

use std::io::{Read, Write};

use eyre::{bail, Context, Result};

/// Largest request this helper will read before giving up; a compromised or
/// confused `sshd` sending an absurd length shouldn't make us allocate
/// unbounded memory.
const MAX_MESSAGE_LEN: usize = 256 * 1024;

pub fn recv_msg(mut r: impl Read) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).context("reading keysign message length")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        bail!("keysign message length {len} exceeds maximum {MAX_MESSAGE_LEN}");
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).context("reading keysign message body")?;
    Ok(buf)
}

pub fn send_msg(mut w: impl Write, body: &[u8]) -> Result<()> {
    w.write_all(&(body.len() as u32).to_be_bytes())?;
    w.write_all(body)?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_message() {
        let mut buf = Vec::new();
        send_msg(&mut buf, b"hello").unwrap();
        let got = recv_msg(&buf[..]).unwrap();
        assert_eq!(got, b"hello");
    }

    #[test]
    fn rejects_oversized_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_LEN as u32 + 1).to_be_bytes());
        assert!(recv_msg(&buf[..]).is_err());
    }
}
