use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BinXmlError {
    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: usize,
        need: usize,
        have: usize,
    },

    #[error("invalid BinXML fragment header token 0x{found:02x} (expected 0x0f)")]
    InvalidFragmentHeader { found: u8 },

    #[error("unknown BinXML token 0x{token:02x} at offset {offset}")]
    UnknownToken { token: u8, offset: usize },

    #[error("unsupported BinXML value type 0x{value_type:02x} at offset {offset}")]
    UnsupportedValueType { value_type: u8, offset: usize },

    #[error("name hash mismatch at offset {offset}: stored 0x{stored:04x}, computed 0x{computed:04x}")]
    NameHashMismatch {
        offset: usize,
        stored: u16,
        computed: u16,
    },

    #[error("inline name at offset {offset} is not NUL terminated (found 0x{found:04x})")]
    MissingNameTerminator { offset: usize, found: u16 },

    #[error("inline name {name:?} at offset {offset} is not a valid XML name")]
    InvalidName { name: String, offset: usize },

    #[error("invalid utf-16 string for {what} at offset {offset}")]
    InvalidUtf16 { what: &'static str, offset: usize },

    #[error("unexpected {token} at offset {offset}: {reason}")]
    UnexpectedToken {
        token: &'static str,
        offset: usize,
        reason: &'static str,
    },

    #[error("end of stream at offset {offset} with {open} unclosed element(s)")]
    UnbalancedElements { offset: usize, open: usize },

    #[error("second root element at offset {offset}")]
    MultipleRootElements { offset: usize },

    #[error("fragment ended at offset {offset} without an end of stream token")]
    MissingEndOfStream { offset: usize },

    #[error("substitution {index} referenced but only {provided} value(s) supplied")]
    MissingSubstitution { index: u16, provided: usize },
}

pub type Result<T> = std::result::Result<T, BinXmlError>;
