//! BinXML token reader for the WEVT inline-name dialect.
//!
//! Token bytes carry a "more data" flag in bit 0x40 (`0x41` = OpenStartElement with an attribute
//! list, `0x46` = Attribute followed by another attribute, ...). The flag only changes the payload
//! for OpenStartElement.

use log::trace;

use super::error::{BinXmlError, Result};
use super::name::BinXmlName;
use crate::utils::ByteCursor;

pub(crate) const TOKEN_END_OF_STREAM: u8 = 0x00;
pub(crate) const TOKEN_OPEN_START_ELEMENT: u8 = 0x01;
pub(crate) const TOKEN_CLOSE_START_ELEMENT: u8 = 0x02;
pub(crate) const TOKEN_CLOSE_EMPTY_ELEMENT: u8 = 0x03;
pub(crate) const TOKEN_END_ELEMENT: u8 = 0x04;
pub(crate) const TOKEN_VALUE: u8 = 0x05;
pub(crate) const TOKEN_ATTRIBUTE: u8 = 0x06;
pub(crate) const TOKEN_CHAR_REF: u8 = 0x08;
pub(crate) const TOKEN_ENTITY_REF: u8 = 0x09;
pub(crate) const TOKEN_NORMAL_SUBSTITUTION: u8 = 0x0d;
pub(crate) const TOKEN_OPTIONAL_SUBSTITUTION: u8 = 0x0e;
pub(crate) const TOKEN_FRAGMENT_HEADER: u8 = 0x0f;

const MORE_DATA_FLAG: u8 = 0x40;

/// BinXML value type tag for UTF-16 strings, the only inline value type templates use.
pub(crate) const VALUE_TYPE_STRING: u8 = 0x01;

/// The 4-byte prologue of every fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FragmentHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BinXmlToken {
    EndOfStream,
    OpenStartElement {
        dependency_id: u16,
        data_size: u32,
        name: BinXmlName,
    },
    CloseStartElement,
    CloseEmptyElement,
    EndElement,
    Value(String),
    Attribute(BinXmlName),
    CharRef(u16),
    EntityRef(BinXmlName),
    Substitution {
        index: u16,
        value_type: u8,
        optional: bool,
    },
}

impl BinXmlToken {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            BinXmlToken::EndOfStream => "end of stream",
            BinXmlToken::OpenStartElement { .. } => "open start element",
            BinXmlToken::CloseStartElement => "close start element",
            BinXmlToken::CloseEmptyElement => "close empty element",
            BinXmlToken::EndElement => "end element",
            BinXmlToken::Value(_) => "value",
            BinXmlToken::Attribute(_) => "attribute",
            BinXmlToken::CharRef(_) => "character reference",
            BinXmlToken::EntityRef(_) => "entity reference",
            BinXmlToken::Substitution { .. } => "substitution",
        }
    }
}

pub(crate) fn read_fragment_header(cursor: &mut ByteCursor<'_>) -> Result<FragmentHeader> {
    let token = cursor.u8_named("fragment header token")?;
    if token != TOKEN_FRAGMENT_HEADER {
        return Err(BinXmlError::InvalidFragmentHeader { found: token });
    }

    Ok(FragmentHeader {
        major_version: cursor.u8_named("fragment header major version")?,
        minor_version: cursor.u8_named("fragment header minor version")?,
        flags: cursor.u8_named("fragment header flags")?,
    })
}

/// Read the token at the cursor position.
pub(crate) fn read_token(cursor: &mut ByteCursor<'_>) -> Result<BinXmlToken> {
    let offset = cursor.pos();
    let raw = cursor.u8_named("token")?;
    let has_more = raw & MORE_DATA_FLAG != 0;

    let token = match raw & !MORE_DATA_FLAG {
        TOKEN_END_OF_STREAM if !has_more => BinXmlToken::EndOfStream,
        TOKEN_OPEN_START_ELEMENT => {
            let dependency_id = cursor.u16_named("open start element dependency id")?;
            let data_size = cursor.u32_named("open start element data size")?;
            let name = BinXmlName::read(cursor)?;
            if has_more {
                // Attribute list size; advisory like `data_size`.
                let _ = cursor.u32_named("attribute list size")?;
            }
            BinXmlToken::OpenStartElement {
                dependency_id,
                data_size,
                name,
            }
        }
        TOKEN_CLOSE_START_ELEMENT if !has_more => BinXmlToken::CloseStartElement,
        TOKEN_CLOSE_EMPTY_ELEMENT if !has_more => BinXmlToken::CloseEmptyElement,
        TOKEN_END_ELEMENT if !has_more => BinXmlToken::EndElement,
        TOKEN_VALUE => {
            let value_type_offset = cursor.pos();
            let value_type = cursor.u8_named("value type")?;
            if value_type != VALUE_TYPE_STRING {
                return Err(BinXmlError::UnsupportedValueType {
                    value_type,
                    offset: value_type_offset,
                });
            }
            BinXmlToken::Value(cursor.len_prefixed_utf16_string("value text")?)
        }
        TOKEN_ATTRIBUTE => BinXmlToken::Attribute(BinXmlName::read(cursor)?),
        TOKEN_CHAR_REF => BinXmlToken::CharRef(cursor.u16_named("character reference")?),
        TOKEN_ENTITY_REF => BinXmlToken::EntityRef(BinXmlName::read(cursor)?),
        TOKEN_NORMAL_SUBSTITUTION | TOKEN_OPTIONAL_SUBSTITUTION if !has_more => {
            let index = cursor.u16_named("substitution index")?;
            let value_type = cursor.u8_named("substitution value type")?;
            BinXmlToken::Substitution {
                index,
                value_type,
                optional: raw == TOKEN_OPTIONAL_SUBSTITUTION,
            }
        }
        _ => return Err(BinXmlError::UnknownToken { token: raw, offset }),
    };

    trace!("offset {offset}: {token:?}");
    Ok(token)
}
