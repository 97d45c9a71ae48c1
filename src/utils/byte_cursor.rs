use crate::binxml::{BinXmlError, Result};
use crate::utils::bytes;

/// A lightweight cursor over an immutable byte slice.
///
/// This is the slice/offset equivalent of `Cursor<&[u8]>`, used by the BinXML token reader where
/// the fragment is already in memory and every read needs an explicit bounds check.
///
/// All reads are little-endian and advance the cursor on success.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    fn truncated(&self, what: &'static str, need: usize) -> BinXmlError {
        BinXmlError::Truncated {
            what,
            offset: self.pos,
            need,
            have: self.remaining(),
        }
    }

    #[inline]
    pub(crate) fn take_bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        let out = bytes::slice(self.buf, self.pos, len).ok_or_else(|| self.truncated(what, len))?;
        self.pos += len;
        Ok(out)
    }

    #[inline]
    pub(crate) fn u8_named(&mut self, what: &'static str) -> Result<u8> {
        let v = bytes::read_u8(self.buf, self.pos).ok_or_else(|| self.truncated(what, 1))?;
        self.pos += 1;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u16_named(&mut self, what: &'static str) -> Result<u16> {
        let v = bytes::read_u16_le(self.buf, self.pos).ok_or_else(|| self.truncated(what, 2))?;
        self.pos += 2;
        Ok(v)
    }

    #[inline]
    pub(crate) fn u32_named(&mut self, what: &'static str) -> Result<u32> {
        let v = bytes::read_u32_le(self.buf, self.pos).ok_or_else(|| self.truncated(what, 4))?;
        self.pos += 4;
        Ok(v)
    }

    /// Read `count` UTF-16LE code units.
    pub(crate) fn utf16_units(&mut self, count: usize, what: &'static str) -> Result<Vec<u16>> {
        let len = count
            .checked_mul(2)
            .ok_or_else(|| self.truncated(what, usize::MAX))?;
        let raw = self.take_bytes(len, what)?;
        Ok(raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    /// Read a `u16` character count followed by that many UTF-16LE code units.
    pub(crate) fn len_prefixed_utf16_string(&mut self, what: &'static str) -> Result<String> {
        let start = self.pos;
        let count = self.u16_named(what)?;
        let units = self.utf16_units(usize::from(count), what)?;
        crate::utils::decode_utf16_units(&units)
            .map_err(|_| BinXmlError::InvalidUtf16 { what, offset: start })
    }
}
