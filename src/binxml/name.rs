//! Inline names (`NameHash NameNumChars NullTerminatedUnicodeString`).
//!
//! WEVT template BinXML carries element, attribute and entity names inline rather than through a
//! chunk string table. The 16-bit hash is the only self-consistency check the format has, so it is
//! always verified.

use std::fmt;

use super::error::{BinXmlError, Result};
use crate::utils::{ByteCursor, decode_utf16_units, encode_utf16le};

/// Multiplier used by the Windows event name hash.
const NAME_HASH_MULTIPLIER: u32 = 65599;

/// Compute the 16-bit name hash over UTF-16 code units.
pub fn name_hash(units: &[u16]) -> u16 {
    let hash = units.iter().fold(0u32, |h, &unit| {
        h.wrapping_mul(NAME_HASH_MULTIPLIER)
            .wrapping_add(u32::from(unit))
    });
    (hash & 0xffff) as u16
}

/// Compute the 16-bit name hash of a string.
pub fn name_hash_str(name: &str) -> u16 {
    let units: Vec<u16> = name.encode_utf16().collect();
    name_hash(&units)
}

/// Names are emitted unescaped, so only XML name characters are accepted.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.' | '\u{b7}'))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinXmlName {
    hash: u16,
    value: String,
}

impl BinXmlName {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        BinXmlName {
            hash: name_hash_str(&value),
            value,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn hash(&self) -> u16 {
        self.hash
    }

    /// Decode an inline name at the cursor position, verifying its hash and terminator.
    pub(crate) fn read(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let offset = cursor.pos();
        let stored = cursor.u16_named("inline name hash")?;
        let char_count = cursor.u16_named("inline name character count")?;
        let units = cursor.utf16_units(usize::from(char_count), "inline name characters")?;

        let terminator_offset = cursor.pos();
        let terminator = cursor.u16_named("inline name terminator")?;
        if terminator != 0 {
            return Err(BinXmlError::MissingNameTerminator {
                offset: terminator_offset,
                found: terminator,
            });
        }

        let computed = name_hash(&units);
        if computed != stored {
            return Err(BinXmlError::NameHashMismatch {
                offset,
                stored,
                computed,
            });
        }

        let value = decode_utf16_units(&units).map_err(|_| BinXmlError::InvalidUtf16 {
            what: "inline name",
            offset,
        })?;
        if !is_xml_name(&value) {
            return Err(BinXmlError::InvalidName { name: value, offset });
        }

        Ok(BinXmlName {
            hash: stored,
            value,
        })
    }

    /// Encode as an inline name structure (hash, character count, characters, NUL).
    pub fn to_inline_bytes(&self) -> Vec<u8> {
        let chars = encode_utf16le(&self.value);
        let char_count = (chars.len() / 2) as u16;

        let mut out = Vec::with_capacity(chars.len() + 6);
        out.extend_from_slice(&self.hash.to_le_bytes());
        out.extend_from_slice(&char_count.to_le_bytes());
        out.extend_from_slice(&chars);
        out.extend_from_slice(&[0, 0]);
        out
    }
}

impl fmt::Display for BinXmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Encode `name` as an inline name structure.
pub fn encode_inline_name(name: &str) -> Vec<u8> {
    BinXmlName::new(name).to_inline_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_matches_known_values() {
        assert_eq!(name_hash(&[]), 0);
        // 'A' alone hashes to its code unit.
        assert_eq!(name_hash_str("A"), 0x41);
        // ('A' * 65599 + 'B') mod 2^32, low 16 bits.
        let expected = (0x41u32.wrapping_mul(65599).wrapping_add(0x42) & 0xffff) as u16;
        assert_eq!(name_hash_str("AB"), expected);
    }

    #[test]
    fn decodes_encoded_name_and_rehashes() {
        let bytes = encode_inline_name("EventData");
        let mut cursor = ByteCursor::new(&bytes);
        let name = BinXmlName::read(&mut cursor).unwrap();

        assert_eq!(name.as_str(), "EventData");
        assert_eq!(name.hash(), name_hash_str("EventData"));
        assert_eq!(cursor.pos(), bytes.len());
    }

    #[test]
    fn corrupting_any_code_unit_fails_the_hash_check() {
        let bytes = encode_inline_name("Data");
        // Characters start after the hash and the count.
        for unit in 0..4 {
            let mut corrupted = bytes.clone();
            corrupted[4 + unit * 2] ^= 0x01;
            let err = BinXmlName::read(&mut ByteCursor::new(&corrupted)).unwrap_err();
            assert!(
                matches!(err, BinXmlError::NameHashMismatch { offset: 0, .. }),
                "unit {unit}: {err:?}"
            );
        }
    }

    #[test]
    fn names_that_are_not_xml_names_fail() {
        for bad in ["a\"<b", "", "1st", "amp;x", "Event Data"] {
            let bytes = encode_inline_name(bad);
            let err = BinXmlName::read(&mut ByteCursor::new(&bytes)).unwrap_err();
            assert_eq!(
                err,
                BinXmlError::InvalidName {
                    name: bad.to_string(),
                    offset: 0
                }
            );
        }

        for good in ["EventData", "xml:lang", "_x-1.2", "Données"] {
            let bytes = encode_inline_name(good);
            assert!(BinXmlName::read(&mut ByteCursor::new(&bytes)).is_ok(), "{good}");
        }
    }

    #[test]
    fn short_buffer_and_missing_terminator_fail() {
        let bytes = encode_inline_name("Data");
        let err = BinXmlName::read(&mut ByteCursor::new(&bytes[..8])).unwrap_err();
        assert!(matches!(err, BinXmlError::Truncated { .. }));

        let mut unterminated = bytes.clone();
        let last = unterminated.len() - 2;
        unterminated[last] = b'x';
        let err = BinXmlName::read(&mut ByteCursor::new(&unterminated)).unwrap_err();
        assert!(matches!(err, BinXmlError::MissingNameTerminator { .. }));
    }
}
