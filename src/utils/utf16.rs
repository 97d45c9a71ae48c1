#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

/// Split a UTF-16LE byte slice into code units.
pub(crate) fn utf16le_units(bytes: &[u8]) -> Result<Vec<u16>, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    let units = utf16le_units(bytes)?;
    decode_utf16_units_z(&units)
}

/// Decode UTF-16 code units until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16_units_z(units: &[u16]) -> Result<String, Utf16LeDecodeError> {
    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    decode_utf16_units(&units[..end])
}

/// Decode UTF-16 code units strictly: unpaired surrogates are an error.
pub(crate) fn decode_utf16_units(units: &[u16]) -> Result<String, Utf16LeDecodeError> {
    // Pure ASCII converts without surrogate handling.
    if units.iter().all(|&c| c <= 0x7F) {
        return Ok(units.iter().map(|&c| char::from(c as u8)).collect());
    }

    String::from_utf16(units).map_err(|_| Utf16LeDecodeError::InvalidData)
}

/// Encode a string as UTF-16LE bytes (no terminator).
pub(crate) fn encode_utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}
