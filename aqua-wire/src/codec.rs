// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::error::{Result, WireError};

/// Width in bytes of every fixed-width name field on the wire (`Parameter`,
/// `Function`, `Constant`).
pub const NAME_WIDTH: usize = 64;

/// Maximum payload size we'll allocate for a single `buf` value. Not part
/// of the original C (which trusted `malloc` to fail loudly), but without
/// it a malformed/hostile length prefix would have us allocate up to 4 GiB
/// on a single deserialize.
pub const MAX_BUF_SIZE: u32 = 64 * 1024 * 1024;

/// Something that knows its own encoded size.
pub trait WireSize {
    fn size_of(&self) -> usize;
}

/// Something that can serialize itself into a caller-provided buffer.
///
/// `write` never allocates; the caller is responsible for sizing `buf` to
/// at least `self.size_of()`. Returns the number of bytes written.
pub trait WireEncode: WireSize {
    fn write(&self, buf: &mut [u8]) -> Result<usize>;

    /// Convenience: serialize into a freshly allocated `Vec<u8>`.
    fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size_of()];
        let n = self.write(&mut buf).expect("buffer sized by size_of()");
        debug_assert_eq!(n, buf.len());
        buf
    }
}

/// Something that can be read back out of a byte buffer.
///
/// Returns the deserialized value and the number of bytes consumed, so
/// callers can chain several decodes over one buffer the way the VDEV
/// connection and call packets embed several serialized values back to
/// back.
pub trait WireDecode: Sized {
    fn read(buf: &[u8]) -> Result<(Self, usize)>;
}

pub(crate) fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.len() < n {
        Err(WireError::Truncated {
            need: n,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Encode a name into a zero-padded, fixed-width ASCII field. `out.len()`
/// is the field width (64 for `Parameter`/`Function`/`Constant` names, 256
/// for the VDEV descriptor's human-readable fields).
pub fn encode_name(name: &str, out: &mut [u8]) -> Result<()> {
    let width = out.len();

    if !name.is_ascii() {
        return Err(WireError::NameNotAscii);
    }

    let bytes = name.as_bytes();

    if bytes.len() >= width {
        return Err(WireError::NameTooLong(name.to_string(), width));
    }

    out.fill(0);
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Decode a zero-padded, fixed-width ASCII name field. `buf` must be
/// exactly the field's width.
pub fn decode_name(buf: &[u8]) -> Result<String> {
    let width = buf.len();
    let end = buf.iter().position(|&b| b == 0).unwrap_or(width);

    std::str::from_utf8(&buf[..end])
        .map(|s| s.to_string())
        .map_err(|_| WireError::NameNotAscii)
}
