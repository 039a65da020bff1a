//! Typed reading and writing of the SSH binary data representations from
//! [RFC 4251 §5](https://datatracker.ietf.org/doc/html/rfc4251#section-5).

pub mod numbers;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unexpected end of data")]
    Truncated,
    #[error("length field exceeds remaining data")]
    BadLength,
    #[error("string is not a valid, NUL-free UTF-8 cstring")]
    BadString,
    #[error("message has trailing data after the expected end")]
    Trailing,
}

pub type Result<T, E = FormatError> = std::result::Result<T, E>;

/// Reads typed fields off a byte buffer, advancing the cursor only on success.
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(FormatError::Truncated);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    /// A `string`: `uint32 length || bytes`.
    pub fn string(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        if len > self.data.len() {
            return Err(FormatError::BadLength);
        }
        self.take(len)
    }

    /// A *cstring*: a `string` that must be valid UTF-8 with no embedded NUL.
    pub fn utf8_string(&mut self) -> Result<&'a str> {
        let bytes = self.string()?;
        if bytes.contains(&0) {
            return Err(FormatError::BadString);
        }
        std::str::from_utf8(bytes).map_err(|_| FormatError::BadString)
    }

    /// An `mpint`: `uint32 length || two's-complement big-endian bytes`.
    ///
    /// Strips a single leading `0x00` sign-pad byte (the one
    /// [`Writer::mpint`] adds when the magnitude's high bit is set), so the
    /// returned slice is always the canonical minimal-length magnitude —
    /// the same form `Writer::mpint` expects as input. This makes the two
    /// proper inverses: re-encoding a decoded mpint reproduces the original
    /// wire bytes, and decoding a freshly-encoded mpint reproduces the
    /// original magnitude.
    pub fn mpint(&mut self) -> Result<&'a [u8]> {
        let bytes = self.string()?;
        Ok(match bytes {
            [0, rest @ ..] if rest.first().is_some_and(|&b| b & 0x80 != 0) => rest,
            _ => bytes,
        })
    }

    /// An `ec_point`: a `string` holding an uncompressed SEC1 point.
    pub fn ec_point(&mut self) -> Result<&'a [u8]> {
        self.string()
    }

    pub fn name_list(&mut self) -> Result<NameList<'a>> {
        Ok(NameList(self.utf8_string()?))
    }

    /// Asserts that no bytes remain, as required at the end of a message.
    pub fn finish(&self) -> Result<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(FormatError::Trailing)
        }
    }
}

/// Builds a message by appending typed fields.
#[derive(Default)]
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.data.push(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.data.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn string(&mut self, bytes: &[u8]) -> &mut Self {
        self.u32(bytes.len() as u32);
        self.write(bytes)
    }

    /// Writes an `mpint`: strips leading zero bytes, re-adding exactly one
    /// `0x00` pad byte when the magnitude's high bit is set, per RFC 4251 §5.
    pub fn mpint(&mut self, magnitude: &[u8]) -> &mut Self {
        let (trimmed, pad_zero) = fixup_mpint(magnitude);
        self.u32((trimmed.len() + pad_zero as usize) as u32);
        if pad_zero {
            self.u8(0);
        }
        self.write(trimmed)
    }

    pub fn name_list(&mut self, list: NameList<'_>) -> &mut Self {
        self.string(list.0.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// A comma-separated SSH name-list, either parsed from the wire or built for
/// sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameList<'a>(pub &'a str);

impl<'a> NameList<'a> {
    pub fn one(name: &'a str) -> Self {
        Self(name)
    }

    pub fn none() -> Self {
        Self("")
    }

    pub fn multi(names: &'a str) -> Self {
        Self(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.split(',').any(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.0.split(',').filter(|s| !s.is_empty())
    }
}

/// Strips the leading zero bytes from a big-endian magnitude and reports
/// whether a `0x00` pad byte must be re-added (high bit of the first
/// remaining byte set). A fully-zero input reduces to an empty slice, the
/// RFC 4251 §5 encoding of the integer `0`.
pub fn fixup_mpint(bytes: &[u8]) -> (&[u8], bool) {
    let mut b = bytes;
    while let [0, rest @ ..] = b {
        b = rest;
    }
    let pad_zero = b.first().is_some_and(|&byte| byte & 0x80 != 0);
    (b, pad_zero)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut w = Writer::new();
        w.string(b"hello");
        let bytes = w.finish();
        assert_eq!(bytes, b"\x00\x00\x00\x05hello");

        let mut r = Reader::new(&bytes);
        assert_eq!(r.string().unwrap(), b"hello");
        r.finish().unwrap();
    }

    #[test]
    fn mpint_high_bit_gets_zero_prefix() {
        let mut w = Writer::new();
        w.mpint(&[0x80]);
        assert_eq!(w.finish(), hex_literal::hex!("00 00 00 02 00 80"));
    }

    #[test]
    fn mpint_zero_is_empty() {
        let mut w = Writer::new();
        w.mpint(&[0, 0, 0]);
        assert_eq!(w.finish(), hex_literal::hex!("00 00 00 00"));
    }

    #[test]
    fn mpint_no_spurious_padding() {
        let mut w = Writer::new();
        w.mpint(&[0x01, 0x02]);
        assert_eq!(w.finish(), hex_literal::hex!("00 00 00 02 01 02"));
    }

    /// `Reader::mpint` must undo exactly what `Writer::mpint` does: the
    /// sign-pad byte added for a high-bit magnitude should not reappear in
    /// the decoded value.
    #[test]
    fn mpint_round_trips_through_reader_and_writer() {
        for magnitude in [&[][..], &[0x01, 0x02][..], &[0x80][..], &[0x80, 0x01, 0x02, 0x03][..]] {
            let mut w = Writer::new();
            w.mpint(magnitude);
            let bytes = w.finish();
            let mut r = Reader::new(&bytes);
            assert_eq!(r.mpint().unwrap(), magnitude);
            r.finish().unwrap();
        }
    }

    #[test]
    fn truncated_read_does_not_advance() {
        let mut r = Reader::new(&[0, 0, 0, 5, 1, 2]);
        assert!(r.string().is_err());
        // The cursor is logically still at the start; a retry with full data works.
        let mut r = Reader::new(&[0, 0, 0, 2, 1, 2]);
        assert_eq!(r.string().unwrap(), &[1, 2]);
    }

    #[test]
    fn cstring_rejects_embedded_nul() {
        let mut w = Writer::new();
        w.string(b"a\0b");
        let bytes = w.finish();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.utf8_string(), Err(FormatError::BadString));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.finish(), Err(FormatError::Trailing));
    }

    #[test]
    fn name_list_contains() {
        let list = NameList("ssh-ed25519,ecdsa-sha2-nistp256");
        assert!(list.contains("ecdsa-sha2-nistp256"));
        assert!(!list.contains("ssh-rsa"));
    }
}
