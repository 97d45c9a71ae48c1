use super::error::{ManifestError, Result};
use crate::guid::Guid;
use crate::utils::bytes;

/// Read a size-prefixed UTF-16 string: `u32` total size (including the prefix), UTF-16LE, NUL.
pub(super) fn read_sized_utf16_string(
    buf: &[u8],
    offset: u32,
    what: &'static str,
) -> Result<String> {
    let off_usize = u32_to_usize(offset, what, buf.len())?;
    let size = read_u32_named(buf, off_usize, what)?;
    if size < 4 {
        return Err(ManifestError::SizeOutOfBounds { what, offset, size });
    }
    let end = checked_end(buf.len(), offset, size, what)?;
    decode_utf16_z(&buf[off_usize + 4..end], what, offset)
}

pub(super) fn decode_utf16_z(bytes: &[u8], what: &'static str, offset: u32) -> Result<String> {
    crate::utils::decode_utf16le_bytes_z(bytes)
        .map_err(|_| ManifestError::InvalidUtf16String { what, offset })
}

fn truncated(buf: &[u8], offset: usize, need: usize, what: &'static str) -> ManifestError {
    ManifestError::Truncated {
        what,
        offset: usize_to_u32(offset),
        need,
        have: buf.len().saturating_sub(offset),
    }
}

pub(super) fn read_sig_named(buf: &[u8], offset: usize, what: &'static str) -> Result<[u8; 4]> {
    bytes::read_sig(buf, offset).ok_or_else(|| truncated(buf, offset, 4, what))
}

pub(super) fn read_u8_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u8> {
    bytes::read_u8(buf, offset).ok_or_else(|| truncated(buf, offset, 1, what))
}

pub(super) fn read_u16_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u16> {
    bytes::read_u16_le(buf, offset).ok_or_else(|| truncated(buf, offset, 2, what))
}

pub(super) fn read_u32_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u32> {
    bytes::read_u32_le(buf, offset).ok_or_else(|| truncated(buf, offset, 4, what))
}

pub(super) fn read_u64_named(buf: &[u8], offset: usize, what: &'static str) -> Result<u64> {
    bytes::read_u64_le(buf, offset).ok_or_else(|| truncated(buf, offset, 8, what))
}

pub(super) fn read_guid_named(buf: &[u8], offset: usize, what: &'static str) -> Result<Guid> {
    let raw = bytes::read_array::<16>(buf, offset).ok_or_else(|| truncated(buf, offset, 16, what))?;
    Ok(Guid::from_bytes(raw))
}

/// Read a signature and compare it against `expected`.
pub(super) fn expect_sig(buf: &[u8], offset: usize, expected: [u8; 4], what: &'static str) -> Result<()> {
    let found = read_sig_named(buf, offset, what)?;
    if found != expected {
        return Err(ManifestError::InvalidSignature {
            offset: usize_to_u32(offset),
            expected,
            found,
        });
    }
    Ok(())
}

/// `0` means "absent" for the optional offsets in CRIM structures.
pub(super) fn non_zero(v: u32) -> Option<u32> {
    (v != 0).then_some(v)
}

pub(super) fn u32_to_usize(offset: u32, what: &'static str, len: usize) -> Result<usize> {
    let off = usize::try_from(offset).map_err(|_| ManifestError::OffsetOutOfBounds {
        what,
        offset,
        len,
    })?;
    if off > len {
        return Err(ManifestError::OffsetOutOfBounds { what, offset, len });
    }
    Ok(off)
}

pub(super) fn usize_to_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

pub(super) fn count_to_usize(count: u32, what: &'static str, offset: usize) -> Result<usize> {
    usize::try_from(count).map_err(|_| ManifestError::CountOutOfBounds {
        what,
        offset: usize_to_u32(offset),
        count,
    })
}

pub(super) fn require_len(buf: &[u8], off: usize, need: usize, what: &'static str) -> Result<()> {
    if off > buf.len() || buf.len().saturating_sub(off) < need {
        return Err(truncated(buf, off, need, what));
    }
    Ok(())
}

/// Require a `count * elem_size` table at `off` and return its byte length.
pub(super) fn require_table(
    buf: &[u8],
    off: usize,
    count: u32,
    elem_size: usize,
    what: &'static str,
) -> Result<usize> {
    let count_usize = count_to_usize(count, what, off)?;
    let table_len = count_usize
        .checked_mul(elem_size)
        .ok_or(ManifestError::CountOutOfBounds {
            what,
            offset: usize_to_u32(off),
            count,
        })?;
    require_len(buf, off, table_len, what)?;
    Ok(table_len)
}

pub(super) fn checked_end(len: usize, off: u32, size: u32, what: &'static str) -> Result<usize> {
    let out_of_bounds = || ManifestError::SizeOutOfBounds {
        what,
        offset: off,
        size,
    };
    let off_usize = u32_to_usize(off, what, len)?;
    let size_usize = usize::try_from(size).map_err(|_| out_of_bounds())?;
    let end = off_usize.checked_add(size_usize).ok_or_else(out_of_bounds)?;
    if end > len {
        return Err(out_of_bounds());
    }
    Ok(end)
}
