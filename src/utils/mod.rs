mod byte_cursor;
pub(crate) mod bytes;
mod utf16;

pub(crate) use self::byte_cursor::ByteCursor;
pub(crate) use self::utf16::{
    decode_utf16_units, decode_utf16le_bytes_z, encode_utf16le, utf16le_units,
};
