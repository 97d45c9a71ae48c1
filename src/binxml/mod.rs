//! Decoding and rendering of the BinXML fragments embedded in `TEMP` template definitions.
//!
//! Template BinXML uses the "inline name" dialect: element, attribute and entity names are stored
//! in place (hash + length + UTF-16 characters) instead of through a chunk string table.
//!
//! - `name`: inline name codec and the 16-bit name hash
//! - `tokens`: token reader
//! - `tree_builder`: explicit-stack tree construction into the `ir` arena
//! - `ir_xml`: non-recursive XML rendering

mod error;
pub mod ir;
mod ir_xml;
pub mod name;
mod tokens;
mod tree_builder;
mod value;

pub use self::error::{BinXmlError, Result};
pub use self::ir::{Attribute, BinXmlFragment, Content, ElementId, ElementNode, Substitution};
pub use self::name::{BinXmlName, encode_inline_name, name_hash, name_hash_str};
pub use self::tokens::FragmentHeader;
pub use self::tree_builder::parse_fragment;
pub use self::value::SubstitutionValue;
