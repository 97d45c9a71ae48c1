use std::borrow::Cow;
use std::fmt::Write;

/// A caller-supplied value for one substitution slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SubstitutionValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Real(f64),
    String(String),
    Binary(Vec<u8>),
}

impl SubstitutionValue {
    /// Text form inserted into the rendered XML (before escaping).
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            SubstitutionValue::Null => Cow::Borrowed(""),
            SubstitutionValue::Bool(v) => Cow::Borrowed(if *v { "true" } else { "false" }),
            SubstitutionValue::Int(v) => Cow::Owned(v.to_string()),
            SubstitutionValue::UInt(v) => Cow::Owned(v.to_string()),
            SubstitutionValue::Real(v) => Cow::Owned(v.to_string()),
            SubstitutionValue::String(v) => Cow::Borrowed(v),
            SubstitutionValue::Binary(bytes) => {
                let mut out = String::with_capacity(bytes.len() * 2);
                for b in bytes {
                    let _ = write!(out, "{b:02X}");
                }
                Cow::Owned(out)
            }
        }
    }
}

impl From<&str> for SubstitutionValue {
    fn from(v: &str) -> Self {
        SubstitutionValue::String(v.to_string())
    }
}

impl From<String> for SubstitutionValue {
    fn from(v: String) -> Self {
        SubstitutionValue::String(v)
    }
}

impl From<bool> for SubstitutionValue {
    fn from(v: bool) -> Self {
        SubstitutionValue::Bool(v)
    }
}

impl From<i64> for SubstitutionValue {
    fn from(v: i64) -> Self {
        SubstitutionValue::Int(v)
    }
}

impl From<u64> for SubstitutionValue {
    fn from(v: u64) -> Self {
        SubstitutionValue::UInt(v)
    }
}

impl From<f64> for SubstitutionValue {
    fn from(v: f64) -> Self {
        SubstitutionValue::Real(v)
    }
}

impl From<Vec<u8>> for SubstitutionValue {
    fn from(v: Vec<u8>) -> Self {
        SubstitutionValue::Binary(v)
    }
}

impl<T: Into<SubstitutionValue>> From<Option<T>> for SubstitutionValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SubstitutionValue::Null, Into::into)
    }
}
